//! Packfile encode and decode.
//!
//! Packs are written undeltified (version 2, SHA-1 trailer). On the
//! receive path both delta encodings are resolved: ofs-delta against
//! an earlier entry of the same pack, ref-delta against any object
//! already in the database.

use crate::object::{parse_tree, GitObject, ObjectId, ObjectKind};
use crate::store::ObjectDatabase;
use crate::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;
// Header (12) plus trailing SHA-1 (20).
const PACK_MIN_LEN: usize = 32;

const KIND_COMMIT: u8 = 1;
const KIND_TREE: u8 = 2;
const KIND_BLOB: u8 = 3;
const KIND_TAG: u8 = 4;
const KIND_OFS_DELTA: u8 = 6;
const KIND_REF_DELTA: u8 = 7;

fn kind_bits(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => KIND_COMMIT,
        ObjectKind::Tree => KIND_TREE,
        ObjectKind::Blob => KIND_BLOB,
        ObjectKind::Tag => KIND_TAG,
    }
}

fn base_kind(bits: u8) -> Option<ObjectKind> {
    match bits {
        KIND_COMMIT => Some(ObjectKind::Commit),
        KIND_TREE => Some(ObjectKind::Tree),
        KIND_BLOB => Some(ObjectKind::Blob),
        KIND_TAG => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// Write a pack containing exactly the given objects, in order.
pub async fn write_pack<S: ObjectDatabase + ?Sized>(
    store: &S,
    ids: &[ObjectId],
) -> Result<Vec<u8>> {
    let mut pack = Vec::new();
    pack.extend_from_slice(PACK_MAGIC);
    pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
    pack.extend_from_slice(&(ids.len() as u32).to_be_bytes());

    for id in ids {
        let obj = store.object(None, id).await?;
        push_entry_header(&mut pack, kind_bits(obj.kind), obj.data.len());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&obj.data)?;
        pack.extend_from_slice(&encoder.finish()?);
    }

    let digest = Sha1::digest(&pack);
    pack.extend_from_slice(&digest);
    Ok(pack)
}

/// Entry header: 3-bit type and size in 4+7n-bit little-endian groups.
fn push_entry_header(pack: &mut Vec<u8>, kind: u8, size: usize) {
    let mut byte = (kind << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        pack.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    pack.push(byte);
}

/// Parse a pack, writing every contained object through the store.
/// Returns the ids in pack order.
pub async fn read_pack<S: ObjectDatabase + ?Sized>(store: &S, data: &[u8]) -> Result<Vec<ObjectId>> {
    if data.len() < PACK_MIN_LEN {
        return Err(Error::Pack("pack shorter than header and trailer".into()));
    }
    if &data[..4] != PACK_MAGIC {
        return Err(Error::Pack("bad pack magic".into()));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != PACK_VERSION {
        return Err(Error::Pack(format!("unsupported pack version {version}")));
    }
    let count = u32::from_be_bytes(data[8..12].try_into().unwrap());

    let body_end = data.len() - 20;
    let digest = Sha1::digest(&data[..body_end]);
    if digest.as_slice() != &data[body_end..] {
        return Err(Error::Pack("pack checksum mismatch".into()));
    }

    let mut ids = Vec::with_capacity(count as usize);
    let mut by_offset: HashMap<usize, ObjectId> = HashMap::new();
    let mut pos = 12;

    for _ in 0..count {
        let entry_start = pos;
        let (bits, size) = parse_entry_header(data, body_end, &mut pos)?;

        let obj = match base_kind(bits) {
            Some(kind) => {
                let (payload, used) = inflate(&data[pos..body_end], size)?;
                pos += used;
                GitObject::new(kind, payload)
            }
            None if bits == KIND_OFS_DELTA => {
                let distance = parse_ofs_distance(data, body_end, &mut pos)?;
                let base_offset = entry_start.checked_sub(distance).ok_or_else(|| {
                    Error::Pack("ofs-delta reaches before the pack start".into())
                })?;
                let base_id = by_offset.get(&base_offset).ok_or_else(|| {
                    Error::Pack("ofs-delta base is not an earlier entry".into())
                })?;
                let base = store.object(None, base_id).await?;
                let (delta, used) = inflate(&data[pos..body_end], size)?;
                pos += used;
                GitObject::new(base.kind, apply_delta(&base.data, &delta)?)
            }
            None if bits == KIND_REF_DELTA => {
                if pos + 20 > body_end {
                    return Err(Error::Pack("truncated ref-delta base id".into()));
                }
                let base_id = ObjectId::from_bytes(&data[pos..pos + 20])
                    .ok_or_else(|| Error::Pack("bad ref-delta base id".into()))?;
                pos += 20;
                let base = store
                    .object(None, &base_id)
                    .await
                    .map_err(|_| Error::Pack(format!("ref-delta base {base_id} not present")))?;
                let (delta, used) = inflate(&data[pos..body_end], size)?;
                pos += used;
                GitObject::new(base.kind, apply_delta(&base.data, &delta)?)
            }
            None => return Err(Error::Pack(format!("unsupported entry type {bits}"))),
        };

        let id = store.put_object(&obj).await?;
        by_offset.insert(entry_start, id);
        ids.push(id);
    }

    if pos != body_end {
        return Err(Error::Pack("trailing bytes after last entry".into()));
    }
    Ok(ids)
}

fn parse_entry_header(data: &[u8], end: usize, pos: &mut usize) -> Result<(u8, usize)> {
    let mut byte = take_byte(data, end, pos)?;
    let bits = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as usize;
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = take_byte(data, end, pos)?;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((bits, size))
}

/// The ofs-delta distance uses the offset encoding with implicit +1
/// per continuation group.
fn parse_ofs_distance(data: &[u8], end: usize, pos: &mut usize) -> Result<usize> {
    let mut byte = take_byte(data, end, pos)?;
    let mut distance = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = take_byte(data, end, pos)?;
        distance = ((distance + 1) << 7) | (byte & 0x7f) as usize;
    }
    Ok(distance)
}

fn take_byte(data: &[u8], end: usize, pos: &mut usize) -> Result<u8> {
    if *pos >= end {
        return Err(Error::Pack("truncated entry header".into()));
    }
    let byte = data[*pos];
    *pos += 1;
    Ok(byte)
}

/// Inflate exactly `expected` bytes and report how much compressed
/// input the zlib stream consumed. Each entry is a complete stream,
/// so it is driven to its end to account for the trailer bytes.
fn inflate(data: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = vec![0u8; expected];
    decoder
        .read_exact(&mut out)
        .map_err(|e| Error::Pack(format!("inflate: {e}")))?;
    let mut overrun = [0u8; 1];
    match decoder.read(&mut overrun) {
        Ok(0) => {}
        Ok(_) => return Err(Error::Pack("entry larger than declared size".into())),
        Err(e) => return Err(Error::Pack(format!("inflate: {e}"))),
    }
    Ok((out, decoder.total_in() as usize))
}

/// Apply a git delta (copy/insert instruction stream) to a base.
fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = delta_varint(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(Error::Pack("delta base size mismatch".into()));
    }
    let target_size = delta_varint(delta, &mut pos)?;
    let mut out = Vec::with_capacity(target_size);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base: offset and size bytes selected by cmd bits.
            let mut offset = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    offset |= (*delta.get(pos).ok_or_else(truncated)? as usize) << (8 * i);
                    pos += 1;
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if cmd & (1 << (4 + i)) != 0 {
                    size |= (*delta.get(pos).ok_or_else(truncated)? as usize) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| Error::Pack("delta copy outside base".into()))?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            // Insert literal bytes.
            let n = cmd as usize;
            if pos + n > delta.len() {
                return Err(truncated());
            }
            out.extend_from_slice(&delta[pos..pos + n]);
            pos += n;
        } else {
            return Err(Error::Pack("delta opcode 0 is reserved".into()));
        }
    }

    if out.len() != target_size {
        return Err(Error::Pack("delta result size mismatch".into()));
    }
    Ok(out)
}

fn truncated() -> Error {
    Error::Pack("truncated delta".into())
}

/// Little-endian 7-bit-group size used at the head of a delta.
fn delta_varint(delta: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta.get(*pos).ok_or_else(truncated)?;
        *pos += 1;
        value |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Objects reachable from `wants` but not from `haves`, in discovery
/// order. Missing objects (e.g. have-side tips we never stored) are
/// skipped rather than treated as errors.
pub async fn closure<S: ObjectDatabase + ?Sized>(
    store: &S,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> Result<Vec<ObjectId>> {
    let known = reachable_set(store, haves).await?;

    let mut order = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = wants.iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        if known.contains(&id) || !seen.insert(id) {
            continue;
        }
        if !store.contains_object(&id).await? {
            continue;
        }
        let obj = store.object(None, &id).await?;
        order.push(id);
        push_children(&obj, &mut stack)?;
    }
    Ok(order)
}

async fn reachable_set<S: ObjectDatabase + ?Sized>(
    store: &S,
    roots: &[ObjectId],
) -> Result<HashSet<ObjectId>> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if !store.contains_object(&id).await? {
            continue;
        }
        let obj = store.object(None, &id).await?;
        push_children(&obj, &mut stack)?;
    }
    Ok(seen)
}

fn push_children(obj: &GitObject, stack: &mut Vec<ObjectId>) -> Result<()> {
    match obj.kind {
        ObjectKind::Commit => {
            for line in String::from_utf8_lossy(&obj.data).lines() {
                if line.is_empty() {
                    break;
                }
                let target = line
                    .strip_prefix("tree ")
                    .or_else(|| line.strip_prefix("parent "));
                if let Some(id) = target.and_then(|hex| ObjectId::from_hex(hex.trim())) {
                    stack.push(id);
                }
            }
        }
        ObjectKind::Tree => {
            for entry in parse_tree(&obj.data)? {
                stack.push(entry.id);
            }
        }
        ObjectKind::Tag => {
            for line in String::from_utf8_lossy(&obj.data).lines() {
                if let Some(id) = line
                    .strip_prefix("object ")
                    .and_then(|hex| ObjectId::from_hex(hex.trim()))
                {
                    stack.push(id);
                }
            }
        }
        ObjectKind::Blob => {}
    }
    Ok(())
}
