//! Repository configuration in the git-config text format.
//!
//! Only the subset a server needs: named sections with optional
//! subsections and key/value entries. Round-trips through
//! `to_bytes`/`parse`, which is what the config capability persists.

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub subsection: Option<String>,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    sections: Vec<Section>,
}

impl RepoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn set(&mut self, section: &str, subsection: Option<&str>, key: &str, value: &str) {
        let section = match self
            .sections
            .iter_mut()
            .find(|s| s.name == section && s.subsection.as_deref() == subsection)
        {
            Some(existing) => existing,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    subsection: subsection.map(str::to_string),
                    entries: Vec::new(),
                });
                self.sections.last_mut().unwrap()
            }
        };
        match section.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => section.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section && s.subsection.as_deref() == subsection)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for section in &self.sections {
            match &section.subsection {
                Some(sub) => out.push_str(&format!("[{} \"{}\"]\n", section.name, sub)),
                None => out.push_str(&format!("[{}]\n", section.name)),
            }
            for (key, value) in &section.entries {
                out.push_str(&format!("\t{key} = {value}\n"));
            }
        }
        out.into_bytes()
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::BadConfig("config is not utf-8".into()))?;
        let mut config = RepoConfig::new();
        let mut current: Option<(String, Option<String>)> = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = Some(parse_section_header(header, lineno)?);
                continue;
            }
            let (section, subsection) = current
                .clone()
                .ok_or_else(|| Error::BadConfig(format!("line {}: entry before any section", lineno + 1)))?;
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::BadConfig(format!("line {}: missing '='", lineno + 1)))?;
            config.set(&section, subsection.as_deref(), key.trim(), value.trim());
        }
        Ok(config)
    }
}

fn parse_section_header(header: &str, lineno: usize) -> Result<(String, Option<String>)> {
    let header = header.trim();
    match header.split_once(' ') {
        None => Ok((header.to_string(), None)),
        Some((name, sub)) => {
            let sub = sub
                .trim()
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .ok_or_else(|| {
                    Error::BadConfig(format!("line {}: malformed subsection", lineno + 1))
                })?;
            Ok((name.to_string(), Some(sub.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_empty() {
        let config = RepoConfig::new();
        assert!(config.is_empty());
        assert_eq!(config.to_bytes(), b"");
        assert_eq!(RepoConfig::parse(b"").unwrap(), config);
    }

    #[test]
    fn set_get_round_trip() {
        let mut config = RepoConfig::new();
        config.set("core", None, "bare", "true");
        config.set("remote", Some("origin"), "url", "http://example/repo.git");
        config.set("core", None, "bare", "false");

        assert_eq!(config.get("core", None, "bare"), Some("false"));
        assert_eq!(
            config.get("remote", Some("origin"), "url"),
            Some("http://example/repo.git")
        );
        assert_eq!(config.get("core", None, "missing"), None);

        let reparsed = RepoConfig::parse(&config.to_bytes()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn parses_comments_and_whitespace() {
        let raw = b"# leading comment\n[core]\n\tbare = true\n; trailing\n\n[user]\n  name = Someone\n";
        let config = RepoConfig::parse(raw).unwrap();
        assert_eq!(config.get("core", None, "bare"), Some("true"));
        assert_eq!(config.get("user", None, "name"), Some("Someone"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(RepoConfig::parse(b"key = value\n").is_err());
        assert!(RepoConfig::parse(b"[core]\nnot an entry\n").is_err());
        assert!(RepoConfig::parse(b"[remote origin]\n").is_err());
        assert!(RepoConfig::parse(&[0xff, 0xfe]).is_err());
    }
}
