//! Git references.
//!
//! A reference either points at an object (`Ref::Hash`) or at another
//! reference (`Ref::Symbolic`, e.g. HEAD -> refs/heads/main).

use crate::object::ObjectId;
use crate::{Error, Result};

pub const HEAD: &str = "HEAD";
pub const REFS_HEADS: &str = "refs/heads/";
pub const REFS_TAGS: &str = "refs/tags/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ref {
    Hash(ObjectId),
    Symbolic(String),
}

impl Ref {
    pub fn symbolic(target: impl Into<String>) -> Self {
        Ref::Symbolic(target.into())
    }

    /// The kind tag persisted by metadata backends.
    pub fn kind(&self) -> &'static str {
        match self {
            Ref::Hash(_) => "hash",
            Ref::Symbolic(_) => "symbolic",
        }
    }
}

/// A reference together with its full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    pub name: String,
    pub target: Ref,
}

impl NamedRef {
    pub fn new(name: impl Into<String>, target: Ref) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

/// Validate a reference name against git's naming rules.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let reject = |why: &str| Err(Error::InvalidRefName(format!("{name:?}: {why}")));

    if name.is_empty() {
        return reject("empty");
    }
    if name == "@" {
        return reject("bare @ is reserved");
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return reject("bad slash placement");
    }
    if name.contains("..") || name.contains("@{") {
        return reject("reserved sequence");
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return reject("bad suffix");
    }
    for c in name.chars() {
        if c.is_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return reject("forbidden character");
        }
    }
    Ok(())
}

/// Extract the branch name from a full ref, if it is one.
pub fn branch_name(full_ref: &str) -> Option<&str> {
    full_ref.strip_prefix(REFS_HEADS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_names() {
        for name in [
            "HEAD",
            "refs/heads/main",
            "refs/heads/feature/nested",
            "refs/tags/v1.0.0",
        ] {
            assert!(validate_ref_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "@",
            "/refs/heads/main",
            "refs/heads/main/",
            "refs//heads",
            "refs/heads/a..b",
            "refs/heads/x.lock",
            "refs/heads/x.",
            "refs/heads/a b",
            "refs/heads/a@{1}",
            "refs/heads/a:b",
        ] {
            assert!(validate_ref_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn branch_extraction() {
        assert_eq!(branch_name("refs/heads/main"), Some("main"));
        assert_eq!(branch_name("refs/tags/v1"), None);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(Ref::Hash(ObjectId::ZERO).kind(), "hash");
        assert_eq!(Ref::symbolic("refs/heads/main").kind(), "symbolic");
    }
}
