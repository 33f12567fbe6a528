//! Smart-HTTP v1 sessions: ref advertisement, upload-pack (fetch)
//! and receive-pack (push).
//!
//! Callers hand in complete request bodies; on the receive path the
//! command section must already be split from the packfile (see
//! [`crate::protocol::command_section_len`]).

use crate::object::ObjectId;
use crate::pack;
use crate::protocol::{
    format_caps, parse_caps, sideband, sideband_chunk, Pkt, PktReader, PktWriter,
    RECEIVE_PACK_CAPS, SIDEBAND_CHUNK, UPLOAD_PACK_CAPS,
};
use crate::refs::{branch_name, NamedRef, Ref, HEAD};
use crate::store::{resolve_ref, ReferenceDatabase, RepositoryStore};
use crate::{Error, Result};

/// The two Smart-HTTP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "git-upload-pack" => Some(Service::UploadPack),
            "git-receive-pack" => Some(Service::ReceivePack),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    fn caps(&self) -> &'static [&'static str] {
        match self {
            Service::UploadPack => UPLOAD_PACK_CAPS,
            Service::ReceivePack => RECEIVE_PACK_CAPS,
        }
    }
}

/// Produce the refs advertisement (everything after the handler's
/// `# service=...` preamble): capabilities on the first line, HEAD
/// first, remaining refs in name order, `capabilities^{}` with the
/// zero id when the repository is empty.
pub async fn advertise_refs<S: RepositoryStore>(store: &S, service: Service) -> Result<Vec<u8>> {
    let caps = format_caps(service.caps());
    let mut refs = store.references().await?;
    refs.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = PktWriter::new();
    let mut first = true;
    let line = |out: &mut PktWriter, id: ObjectId, name: &str, first: &mut bool| {
        if *first {
            out.text(&format!("{id} {name}\0{caps}"));
            *first = false;
        } else {
            out.text(&format!("{id} {name}"));
        }
    };

    if let Ok(head) = resolve_ref(store, HEAD).await {
        line(&mut out, head, HEAD, &mut first);
    }
    for r in &refs {
        if r.name == HEAD {
            continue;
        }
        let id = match &r.target {
            Ref::Hash(id) => *id,
            // A dangling symbolic ref is not advertisable.
            Ref::Symbolic(_) => match resolve_ref(store, &r.name).await {
                Ok(id) => id,
                Err(_) => continue,
            },
        };
        line(&mut out, id, &r.name, &mut first);
    }

    if first {
        out.text(&format!("{} capabilities^{{}}\0{caps}", ObjectId::ZERO));
    }
    out.flush();
    Ok(out.into_vec())
}

/// Run an upload-pack session over a complete request body and return
/// the response body (ACK/NAK negotiation followed by the pack).
pub async fn upload_pack<S: RepositoryStore>(store: &S, body: &[u8]) -> Result<Vec<u8>> {
    let mut wants = Vec::new();
    let mut haves = Vec::new();
    let mut caps: Vec<String> = Vec::new();

    let mut reader = PktReader::new(body);
    while let Some(pkt) = reader.read()? {
        let Pkt::Data(data) = pkt else { continue };
        let line = std::str::from_utf8(data)
            .map_err(|_| Error::Protocol("upload-pack request is not utf-8".into()))?
            .trim_end_matches('\n');

        if let Some(rest) = line.strip_prefix("want ") {
            let mut fields = rest.split(' ');
            let id = fields
                .next()
                .and_then(ObjectId::from_hex)
                .ok_or_else(|| Error::Protocol(format!("malformed want line: {line:?}")))?;
            if wants.is_empty() {
                // Capabilities ride the first want line.
                caps.extend(fields.map(str::to_string));
            }
            wants.push(id);
        } else if let Some(rest) = line.strip_prefix("have ") {
            if let Some(id) = ObjectId::from_hex(rest.trim()) {
                haves.push(id);
            }
        }
        // "done" and anything we did not advertise are ignored; the
        // whole negotiation is answered in this one response.
    }

    let use_sideband = caps.iter().any(|c| c == "side-band-64k" || c == "side-band");
    let multi_ack_detailed = caps.iter().any(|c| c == "multi_ack_detailed");

    let mut out = PktWriter::new();
    if wants.is_empty() {
        out.text("NAK");
        out.flush();
        return Ok(out.into_vec());
    }

    let mut common = Vec::new();
    for have in &haves {
        if store.contains_object(have).await? {
            common.push(*have);
        }
    }

    if multi_ack_detailed {
        for id in &common {
            out.text(&format!("ACK {id} common"));
        }
        if let Some(last) = common.last() {
            out.text(&format!("ACK {last} ready"));
        }
        out.text("NAK");
    } else if let Some(last) = common.last() {
        out.text(&format!("ACK {last}"));
    } else {
        out.text("NAK");
    }

    let ids = pack::closure(store, &wants, &common).await?;
    let pack_data = pack::write_pack(store, &ids).await?;

    if use_sideband {
        for chunk in pack_data.chunks(SIDEBAND_CHUNK) {
            out.raw(&sideband_chunk(sideband::DATA, chunk));
        }
        out.flush();
    } else {
        out.raw(&pack_data);
    }
    Ok(out.into_vec())
}

struct RefUpdate {
    old: Option<ObjectId>,
    new: Option<ObjectId>,
    name: String,
}

fn parse_commands(commands: &[u8]) -> Result<(Vec<RefUpdate>, Vec<String>)> {
    let mut updates = Vec::new();
    let mut caps = Vec::new();

    let mut reader = PktReader::new(commands);
    while let Some(pkt) = reader.read()? {
        let Pkt::Data(data) = pkt else { break };
        let line = std::str::from_utf8(data)
            .map_err(|_| Error::Protocol("receive-pack command is not utf-8".into()))?
            .trim_end_matches('\n');

        // The first command carries capabilities after a NUL.
        let line = match line.split_once('\0') {
            Some((command, raw_caps)) => {
                if caps.is_empty() {
                    caps = parse_caps(raw_caps);
                }
                command
            }
            None => line,
        };

        let mut fields = line.splitn(3, ' ');
        let (old, new, name) = match (fields.next(), fields.next(), fields.next()) {
            (Some(old), Some(new), Some(name)) => (old, new, name),
            _ => return Err(Error::Protocol(format!("malformed update command: {line:?}"))),
        };
        let old = parse_command_id(old)?;
        let new = parse_command_id(new)?;
        updates.push(RefUpdate {
            old,
            new,
            name: name.to_string(),
        });
    }
    Ok((updates, caps))
}

fn parse_command_id(hex: &str) -> Result<Option<ObjectId>> {
    let id = ObjectId::from_hex(hex)
        .ok_or_else(|| Error::Protocol(format!("malformed object id: {hex:?}")))?;
    Ok(if id.is_zero() { None } else { Some(id) })
}

/// Run a receive-pack session. `commands` is the pkt-line command
/// section including its flush; `packfile` is everything after it
/// (may be empty for delete-only pushes). Returns the report-status
/// body.
pub async fn receive_pack<S: RepositoryStore>(
    store: &S,
    commands: &[u8],
    packfile: &[u8],
) -> Result<Vec<u8>> {
    let (updates, caps) = parse_commands(commands)?;
    let use_sideband = caps.iter().any(|c| c == "side-band-64k" || c == "side-band");
    let report_status = caps.iter().any(|c| c == "report-status");

    let unpack_error = if packfile.is_empty() {
        None
    } else {
        pack::read_pack(store, packfile).await.err()
    };

    let mut lines = Vec::new();
    match &unpack_error {
        None => lines.push("unpack ok\n".to_string()),
        Some(err) => lines.push(format!("unpack {err}\n")),
    }

    let mut created_branches: Vec<&str> = Vec::new();
    for update in &updates {
        if unpack_error.is_some() {
            lines.push(format!("ng {} unpacker error\n", update.name));
            continue;
        }
        match apply_update(store, update).await {
            Ok(()) => {
                lines.push(format!("ok {}\n", update.name));
                if update.new.is_some() && branch_name(&update.name).is_some() {
                    created_branches.push(&update.name);
                }
            }
            Err(err) => lines.push(format!("ng {} {err}\n", update.name)),
        }
    }

    // First push into a bare repository: give clones a default branch.
    if unpack_error.is_none() && !created_branches.is_empty() {
        if let Err(Error::RefNotFound(_)) = store.reference(HEAD).await {
            store
                .set_ref(&NamedRef::new(HEAD, Ref::symbolic(created_branches[0])))
                .await?;
        }
    }

    if !report_status {
        return Ok(Vec::new());
    }

    let mut report = PktWriter::new();
    for line in &lines {
        report.data(line.as_bytes());
    }
    report.flush();

    let mut out = PktWriter::new();
    if use_sideband {
        for chunk in report.as_slice().chunks(SIDEBAND_CHUNK) {
            out.raw(&sideband_chunk(sideband::DATA, chunk));
        }
        out.flush();
    } else {
        out.raw(report.as_slice());
    }
    Ok(out.into_vec())
}

async fn apply_update<S: ReferenceDatabase>(store: &S, update: &RefUpdate) -> Result<()> {
    let old = update.old.map(Ref::Hash);
    let new = update.new.map(Ref::Hash);
    store
        .check_and_set_ref(&update.name, old.as_ref(), new.as_ref())
        .await
}
