//! Pkt-line framing (Git protocol v1).
//!
//! A pkt-line is a 4-digit ASCII-hex length (covering itself) followed
//! by the payload; "0000" is the flush-pkt. On the receive-pack path
//! the command section must be split from the packfile without
//! over-reading, which `command_section_len` does by walking lengths.

use crate::{Error, Result};

/// The flush packet.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Largest payload a single pkt-line may carry.
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// Sideband payload size leaving room for the channel byte.
pub const SIDEBAND_CHUNK: usize = 65515;

/// Encode one pkt-line.
pub fn pkt_line(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PKT_PAYLOAD);
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Encode a textual pkt-line with the conventional trailing newline.
pub fn pkt_text(line: &str) -> Vec<u8> {
    pkt_line(format!("{line}\n").as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pkt<'a> {
    Flush,
    Data(&'a [u8]),
}

/// Decoder over a complete in-memory request body.
pub struct PktReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Next pkt-line, or `None` at end of input.
    pub fn read(&mut self) -> Result<Option<Pkt<'a>>> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let len = parse_pkt_len(&self.buf[self.pos..])?;
        if len == 0 {
            self.pos += 4;
            return Ok(Some(Pkt::Flush));
        }
        if self.pos + len > self.buf.len() {
            return Err(Error::Protocol("pkt-line overruns input".into()));
        }
        let payload = &self.buf[self.pos + 4..self.pos + len];
        self.pos += len;
        Ok(Some(Pkt::Data(payload)))
    }

    /// Bytes not yet consumed by the decoder.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Accumulates an in-memory pkt-line response.
#[derive(Default)]
pub struct PktWriter {
    out: Vec<u8>,
}

impl PktWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&mut self, payload: &[u8]) {
        self.out.extend_from_slice(&pkt_line(payload));
    }

    pub fn text(&mut self, line: &str) {
        self.out.extend_from_slice(&pkt_text(line));
    }

    pub fn flush(&mut self) {
        self.out.extend_from_slice(FLUSH_PKT);
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.out
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.out
    }
}

/// Sideband channels (multiplexed over pkt-lines).
pub mod sideband {
    pub const DATA: u8 = 1;
    pub const PROGRESS: u8 = 2;
    pub const ERROR: u8 = 3;
}

/// Frame one sideband chunk as a pkt-line.
pub fn sideband_chunk(channel: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 1);
    payload.push(channel);
    payload.extend_from_slice(data);
    pkt_line(&payload)
}

/// Length of the command section of a receive-pack body, including the
/// terminating flush-pkt. Everything after this offset is the packfile.
///
/// Walks pkt-line lengths only; payloads are never inspected, so
/// buffered decoding cannot eat into the packfile bytes.
pub fn command_section_len(body: &[u8]) -> Result<usize> {
    let mut offset = 0;
    loop {
        if body.len() - offset < 4 {
            return Err(Error::Protocol("missing flush-pkt before packfile".into()));
        }
        let len = parse_pkt_len(&body[offset..])?;
        if len == 0 {
            return Ok(offset + 4);
        }
        if offset + len > body.len() {
            return Err(Error::Protocol("pkt-line overruns input".into()));
        }
        offset += len;
    }
}

fn parse_pkt_len(buf: &[u8]) -> Result<usize> {
    if buf.len() < 4 {
        return Err(Error::Protocol("truncated pkt-line header".into()));
    }
    let header = &buf[..4];
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::Protocol("invalid pkt-line length".into()));
    }
    // Checked hex-digits above, so both steps are infallible here.
    let len = usize::from_str_radix(std::str::from_utf8(header).unwrap(), 16).unwrap();
    if len == 0 {
        return Ok(0);
    }
    if len < 4 {
        return Err(Error::Protocol("pkt-line length below header size".into()));
    }
    Ok(len)
}

/// Capabilities advertised for upload-pack sessions.
pub const UPLOAD_PACK_CAPS: &[&str] = &[
    "multi_ack_detailed",
    "side-band-64k",
    "no-progress",
    "agent=gitvault/0.1",
];

/// Capabilities advertised for receive-pack sessions.
pub const RECEIVE_PACK_CAPS: &[&str] = &[
    "report-status",
    "delete-refs",
    "side-band-64k",
    "ofs-delta",
    "agent=gitvault/0.1",
];

pub fn format_caps(caps: &[&str]) -> String {
    caps.join(" ")
}

pub fn parse_caps(raw: &str) -> Vec<String> {
    raw.split_ascii_whitespace().map(str::to_string).collect()
}
