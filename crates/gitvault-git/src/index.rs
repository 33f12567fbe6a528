//! Version-2 index codec.
//!
//! A bare server never checks out a working tree, so stat data is
//! stored zeroed; what matters is that the serialization round-trips
//! and that "no index" decodes as the empty version-2 index.

use crate::object::ObjectId;
use crate::{Error, Result};
use sha1::{Digest, Sha1};

const INDEX_MAGIC: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 2;
const ENTRY_FIXED_LEN: usize = 62;
const NAME_LEN_MASK: u16 = 0x0fff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub id: ObjectId,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub version: u32,
    pub entries: Vec<IndexEntry>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Index {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        for entry in &entries {
            let start = out.len();
            // ctime/mtime sec+nsec, dev, ino: zeroed on a bare server.
            out.extend_from_slice(&[0u8; 24]);
            out.extend_from_slice(&entry.mode.to_be_bytes());
            // uid, gid, file size: zeroed as well.
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(entry.id.as_bytes());
            let name_len = entry.path.len().min(NAME_LEN_MASK as usize) as u16;
            out.extend_from_slice(&name_len.to_be_bytes());
            out.extend_from_slice(entry.path.as_bytes());
            // Pad with NULs to an 8-byte multiple, at least one.
            let len = out.len() - start;
            out.extend_from_slice(&vec![0u8; 8 - (len % 8)]);
        }

        let digest = Sha1::digest(&out);
        out.extend_from_slice(&digest);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 12 + 20 {
            return Err(Error::BadIndex("shorter than header and checksum".into()));
        }
        if &raw[..4] != INDEX_MAGIC {
            return Err(Error::BadIndex("bad magic".into()));
        }
        let version = u32::from_be_bytes(raw[4..8].try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(Error::BadIndex(format!("unsupported version {version}")));
        }
        let count = u32::from_be_bytes(raw[8..12].try_into().unwrap());

        let body_end = raw.len() - 20;
        let digest = Sha1::digest(&raw[..body_end]);
        if digest.as_slice() != &raw[body_end..] {
            return Err(Error::BadIndex("checksum mismatch".into()));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut pos = 12;
        for _ in 0..count {
            if pos + ENTRY_FIXED_LEN > body_end {
                return Err(Error::BadIndex("truncated entry".into()));
            }
            let mode = u32::from_be_bytes(raw[pos + 24..pos + 28].try_into().unwrap());
            let id = ObjectId::from_bytes(&raw[pos + 40..pos + 60])
                .ok_or_else(|| Error::BadIndex("bad entry id".into()))?;
            let flags = u16::from_be_bytes(raw[pos + 60..pos + 62].try_into().unwrap());
            let name_len = (flags & NAME_LEN_MASK) as usize;

            let name_start = pos + ENTRY_FIXED_LEN;
            if name_start + name_len > body_end {
                return Err(Error::BadIndex("truncated entry name".into()));
            }
            let path = std::str::from_utf8(&raw[name_start..name_start + name_len])
                .map_err(|_| Error::BadIndex("entry name is not utf-8".into()))?
                .to_string();

            let len = ENTRY_FIXED_LEN + name_len;
            pos += len + (8 - (len % 8));
            if pos > body_end {
                return Err(Error::BadIndex("truncated entry padding".into()));
            }
            entries.push(IndexEntry { path, id, mode });
        }

        if pos != body_end {
            return Err(Error::BadIndex("trailing bytes after entries".into()));
        }
        Ok(Self { version, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_round_trip() {
        let index = Index::default();
        assert_eq!(index.version, 2);
        let raw = index.encode();
        assert_eq!(raw.len(), 12 + 20);
        assert_eq!(Index::decode(&raw).unwrap(), index);
    }

    #[test]
    fn entries_round_trip_sorted() {
        let id = ObjectId::from_hex("3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap();
        let index = Index {
            version: 2,
            entries: vec![
                IndexEntry {
                    path: "zeta.txt".into(),
                    id,
                    mode: 0o100644,
                },
                IndexEntry {
                    path: "alpha/beta.txt".into(),
                    id,
                    mode: 0o100755,
                },
            ],
        };
        let decoded = Index::decode(&index.encode()).unwrap();
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].path, "alpha/beta.txt");
        assert_eq!(decoded.entries[1].path, "zeta.txt");
        assert_eq!(decoded.entries[0].mode, 0o100755);
        assert_eq!(decoded.entries[1].id, id);
    }

    #[test]
    fn rejects_corruption() {
        let mut raw = Index::default().encode();
        raw[4] = 9; // version
        assert!(Index::decode(&raw).is_err());

        let mut raw = Index::default().encode();
        let last = raw.len() - 1;
        raw[last] ^= 0xff; // checksum
        assert!(Index::decode(&raw).is_err());

        assert!(Index::decode(b"DIRC").is_err());
        assert!(Index::decode(&[0u8; 32]).is_err());
    }
}
