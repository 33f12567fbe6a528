//! Reference capability over the metadata store.
//!
//! The `kind` column selects which of `hash`/`target` is populated;
//! conversion in either direction enforces well-formed 40-hex hashes.

use super::RepoStore;
use crate::meta_store::{MetaStoreError, RefRow, RefValue};
use async_trait::async_trait;
use gitvault_git::object::ObjectId;
use gitvault_git::refs::{validate_ref_name, NamedRef, Ref};
use gitvault_git::store::ReferenceDatabase;
use gitvault_git::{Error, Result};

fn to_value(target: &Ref) -> RefValue {
    match target {
        Ref::Hash(id) => RefValue {
            kind: target.kind().to_string(),
            hash: Some(id.to_hex()),
            target: None,
        },
        Ref::Symbolic(name) => RefValue {
            kind: target.kind().to_string(),
            hash: None,
            target: Some(name.clone()),
        },
    }
}

fn from_row(row: RefRow) -> Result<NamedRef> {
    let target = match row.kind.as_str() {
        "symbolic" => {
            let target = row.target.ok_or_else(|| {
                Error::Storage(format!("symbolic ref {} has no target", row.ref_name))
            })?;
            Ref::Symbolic(target)
        }
        "hash" => {
            let hash = row
                .hash
                .as_deref()
                .and_then(ObjectId::from_hex)
                .ok_or_else(|| {
                    Error::Storage(format!("ref {} has a malformed hash", row.ref_name))
                })?;
            Ref::Hash(hash)
        }
        other => {
            return Err(Error::Storage(format!(
                "ref {} has unknown kind {other:?}",
                row.ref_name
            )))
        }
    };
    Ok(NamedRef::new(row.ref_name, target))
}

fn meta_err(name: &str, err: MetaStoreError) -> Error {
    match err {
        MetaStoreError::NotFound => Error::RefNotFound(name.to_string()),
        MetaStoreError::RefConflict => Error::RefConflict(name.to_string()),
        other => Error::Storage(other.to_string()),
    }
}

#[async_trait]
impl ReferenceDatabase for RepoStore {
    async fn set_ref(&self, r: &NamedRef) -> Result<()> {
        validate_ref_name(&r.name)?;
        self.meta
            .put_ref(&self.repo, &r.name, &to_value(&r.target))
            .await
            .map_err(|err| meta_err(&r.name, err))
    }

    async fn check_and_set_ref(
        &self,
        name: &str,
        old: Option<&Ref>,
        new: Option<&Ref>,
    ) -> Result<()> {
        validate_ref_name(name)?;
        let old = old.map(to_value);
        let new = new.map(to_value);
        self.meta
            .cas_ref(&self.repo, name, old.as_ref(), new.as_ref())
            .await
            .map_err(|err| meta_err(name, err))
    }

    async fn reference(&self, name: &str) -> Result<NamedRef> {
        let row = self
            .meta
            .get_ref(&self.repo, name)
            .await
            .map_err(|err| meta_err(name, err))?;
        from_row(row)
    }

    async fn references(&self) -> Result<Vec<NamedRef>> {
        let rows = self
            .meta
            .list_refs(&self.repo)
            .await
            .map_err(|err| meta_err("*", err))?;
        rows.into_iter().map(from_row).collect()
    }

    async fn remove_ref(&self, name: &str) -> Result<()> {
        self.meta
            .delete_ref(&self.repo, name)
            .await
            .map_err(|err| meta_err(name, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_refs_round_trip_through_rows() {
        let id = ObjectId::from_hex("3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap();
        let value = to_value(&Ref::Hash(id));
        assert_eq!(value.kind, "hash");
        assert_eq!(value.hash.as_deref(), Some(id.to_hex().as_str()));
        assert_eq!(value.target, None);

        let row = RefRow {
            ref_name: "refs/heads/main".into(),
            kind: value.kind,
            hash: value.hash,
            target: value.target,
        };
        let named = from_row(row).unwrap();
        assert_eq!(named.name, "refs/heads/main");
        assert_eq!(named.target, Ref::Hash(id));
    }

    #[test]
    fn symbolic_refs_round_trip_through_rows() {
        let value = to_value(&Ref::symbolic("refs/heads/main"));
        assert_eq!(value.kind, "symbolic");
        assert_eq!(value.hash, None);

        let row = RefRow {
            ref_name: "HEAD".into(),
            kind: value.kind,
            hash: value.hash,
            target: value.target,
        };
        assert_eq!(from_row(row).unwrap().target, Ref::symbolic("refs/heads/main"));
    }

    #[test]
    fn malformed_rows_are_storage_errors() {
        let bad_hash = RefRow {
            ref_name: "refs/heads/main".into(),
            kind: "hash".into(),
            hash: Some("not-forty-hex".into()),
            target: None,
        };
        assert!(matches!(from_row(bad_hash), Err(Error::Storage(_))));

        let bad_kind = RefRow {
            ref_name: "refs/heads/main".into(),
            kind: "mystery".into(),
            hash: None,
            target: None,
        };
        assert!(matches!(from_row(bad_kind), Err(Error::Storage(_))));
    }
}
