//! Git object model.
//!
//! An object is identified by the SHA-1 of its loose form,
//! `"<kind> <size>\0<payload>"`. That loose form is also what the
//! storage layer persists, so encode/decode here defines the on-store
//! byte layout.

use crate::{Error, Result};
use sha1::{Digest, Sha1};
use std::fmt;

/// The four object kinds git knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            "commit" => Ok(ObjectKind::Commit),
            "tag" => Ok(ObjectKind::Tag),
            other => Err(Error::UnknownObjectType(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 20-byte SHA-1 object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// The all-zero id, used on the wire for "no object".
    pub const ZERO: ObjectId = ObjectId([0u8; 20]);

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let raw: [u8; 20] = raw.try_into().ok()?;
        Some(ObjectId(raw))
    }

    pub fn from_hex(hex40: &str) -> Option<Self> {
        if hex40.len() != 40 {
            return None;
        }
        let raw = hex::decode(hex40).ok()?;
        Self::from_bytes(&raw)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An object held in memory: kind plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl GitObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn blob(data: Vec<u8>) -> Self {
        Self::new(ObjectKind::Blob, data)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// SHA-1 over the loose header and payload.
    pub fn id(&self) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", self.kind, self.data.len()).as_bytes());
        hasher.update(&self.data);
        let digest = hasher.finalize();
        ObjectId::from_bytes(&digest).expect("sha1 digest is 20 bytes")
    }

    /// Serialize to the loose on-store form.
    pub fn encode_loose(&self) -> Vec<u8> {
        let mut out = format!("{} {}\0", self.kind, self.data.len()).into_bytes();
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse the loose form, validating header kind and declared size.
    pub fn decode_loose(raw: &[u8]) -> Result<Self> {
        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::BadObject("missing header terminator".into()))?;
        let header = std::str::from_utf8(&raw[..nul])
            .map_err(|_| Error::BadObject("header is not utf-8".into()))?;
        let (kind, size) = header
            .split_once(' ')
            .ok_or_else(|| Error::BadObject("header missing size".into()))?;
        let kind = ObjectKind::parse(kind)?;
        let size: usize = size
            .parse()
            .map_err(|_| Error::BadObject(format!("bad size in header: {size:?}")))?;

        let data = raw[nul + 1..].to_vec();
        if data.len() != size {
            return Err(Error::BadObject(format!(
                "declared size {size} but payload is {}",
                data.len()
            )));
        }
        Ok(Self { kind, data })
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode == 0o40000
    }
}

/// Parse the binary payload of a tree object.
pub fn parse_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let sp = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::BadObject("tree entry missing mode".into()))?;
        let mode = std::str::from_utf8(&data[pos..pos + sp])
            .ok()
            .and_then(|s| u32::from_str_radix(s, 8).ok())
            .ok_or_else(|| Error::BadObject("tree entry has bad mode".into()))?;
        pos += sp + 1;

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::BadObject("tree entry missing name terminator".into()))?;
        let name = std::str::from_utf8(&data[pos..pos + nul])
            .map_err(|_| Error::BadObject("tree entry name is not utf-8".into()))?
            .to_string();
        pos += nul + 1;

        if pos + 20 > data.len() {
            return Err(Error::BadObject("tree entry truncated id".into()));
        }
        let id = ObjectId::from_bytes(&data[pos..pos + 20])
            .ok_or_else(|| Error::BadObject("tree entry has bad id".into()))?;
        pos += 20;

        entries.push(TreeEntry { mode, name, id });
    }

    Ok(entries)
}

/// Serialize tree entries back to the binary payload.
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_hex_round_trip() {
        let hex = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert!(!id.is_zero());
        assert!(ObjectId::from_hex("da39").is_none());
        assert!(ObjectId::from_hex(&"x".repeat(40)).is_none());
    }

    #[test]
    fn known_blob_ids() {
        // Well-known hashes for the empty blob and "hello world\n".
        let empty = GitObject::blob(Vec::new());
        assert_eq!(empty.id().to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");

        let hello = GitObject::blob(b"hello world\n".to_vec());
        assert_eq!(hello.id().to_hex(), "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
    }

    #[test]
    fn empty_tree_id() {
        let tree = GitObject::new(ObjectKind::Tree, Vec::new());
        assert_eq!(tree.id().to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn loose_round_trip() {
        let obj = GitObject::new(ObjectKind::Commit, b"tree 4b82...\n".to_vec());
        let loose = obj.encode_loose();
        assert!(loose.starts_with(b"commit 13\0"));
        assert_eq!(GitObject::decode_loose(&loose).unwrap(), obj);
    }

    #[test]
    fn loose_rejects_garbage() {
        assert!(GitObject::decode_loose(b"blob 4").is_err());
        assert!(GitObject::decode_loose(b"blob abc\0data").is_err());
        assert!(GitObject::decode_loose(b"sock 4\0data").is_err());
        assert!(GitObject::decode_loose(b"blob 3\0data").is_err());
    }

    #[test]
    fn tree_round_trip() {
        let entries = vec![
            TreeEntry {
                mode: 0o100644,
                name: "hello.txt".into(),
                id: ObjectId::from_hex("3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap(),
            },
            TreeEntry {
                mode: 0o40000,
                name: "sub".into(),
                id: ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap(),
            },
        ];
        let raw = encode_tree(&entries);
        let parsed = parse_tree(&raw).unwrap();
        assert_eq!(parsed, entries);
        assert!(parsed[1].is_tree());
        assert!(!parsed[0].is_tree());
    }
}
