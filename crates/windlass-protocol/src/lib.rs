//! Shared wire-format types and constants for windlass client ↔ server
//! communication.
//!
//! This crate is intentionally minimal: the pull request/response DTOs, frame
//! size accounting, the length-delimited stream codec, and client-side stream
//! reassembly. No storage I/O, no threading.

use serde::{Deserialize, Serialize};

// ── Frame size constants ───────────────────────────────────────────────────

/// Default soft cap, in bytes, on a frame's body plus metadata.
///
/// Chosen to keep every wire message comfortably under common transport
/// message limits. Sessions may be configured with a smaller limit.
pub const DEFAULT_CHUNK_LIMIT: usize = 4 * 1024 * 1024;

/// Hard cap on a single encoded wire message. Anything larger is a bug on
/// the sending side, so the decoder refuses it instead of allocating.
pub const MAX_WIRE_FRAME: usize = 16 * 1024 * 1024;

/// Metadata field names, as counted by frame size accounting.
///
/// The chunk limit covers body bytes *plus* the metadata that rides along
/// with them, so both sides must agree on the per-field name cost.
pub const FIELD_BACKUP_ID: &str = "backup_id";
pub const FIELD_LOG_ID: &str = "log_id";
pub const FIELD_ATTACHMENT_HOLDERS: &str = "attachment_holders";

// ── Pull wire types ────────────────────────────────────────────────────────

/// A client's request to pull one backup. Both ids must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub user_id: String,
    pub backup_id: String,
}

/// One frame of the pull response stream.
///
/// Empty fields signal absence. At most one of the two body fields
/// (`compaction_chunk`, `log_chunk`) is populated per frame; a frame may
/// carry metadata only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub backup_id: String,
    #[serde(default)]
    pub log_id: String,
    #[serde(default)]
    pub attachment_holders: String,
    #[serde(default)]
    pub compaction_chunk: Vec<u8>,
    #[serde(default)]
    pub log_chunk: Vec<u8>,
}

impl PullResponse {
    /// Byte size of the populated metadata fields: the sum of field-name and
    /// field-value lengths of every non-empty metadata field.
    pub fn metadata_overhead(&self) -> usize {
        let mut total = 0;
        if !self.backup_id.is_empty() {
            total += FIELD_BACKUP_ID.len() + self.backup_id.len();
        }
        if !self.log_id.is_empty() {
            total += FIELD_LOG_ID.len() + self.log_id.len();
        }
        if !self.attachment_holders.is_empty() {
            total += FIELD_ATTACHMENT_HOLDERS.len() + self.attachment_holders.len();
        }
        total
    }

    /// The populated body field, if any.
    pub fn body(&self) -> &[u8] {
        if !self.compaction_chunk.is_empty() {
            &self.compaction_chunk
        } else {
            &self.log_chunk
        }
    }
}

/// One item of the encoded pull stream: zero or more frames followed by
/// exactly one terminal item carrying the call's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamItem {
    Frame(PullResponse),
    End { error: Option<String> },
}

// ── Stream codec ───────────────────────────────────────────────────────────

/// Errors from encoding or decoding the length-delimited pull stream.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("frame decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("encoded frame of {0} bytes exceeds the wire frame cap")]
    Oversize(usize),

    #[error("truncated stream: expected {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

/// Encode one stream item as a `u32` big-endian length prefix followed by a
/// MessagePack payload.
pub fn encode_item(item: &StreamItem) -> Result<Vec<u8>, CodecError> {
    let payload = rmp_serde::to_vec(item)?;
    if payload.len() > MAX_WIRE_FRAME {
        return Err(CodecError::Oversize(payload.len()));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a complete byte buffer into its stream items.
pub fn decode_stream(mut bytes: &[u8]) -> Result<Vec<StreamItem>, CodecError> {
    let mut items = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated {
                expected: 4,
                found: bytes.len(),
            });
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_WIRE_FRAME {
            return Err(CodecError::Oversize(len));
        }
        let rest = &bytes[4..];
        if rest.len() < len {
            return Err(CodecError::Truncated {
                expected: len,
                found: rest.len(),
            });
        }
        items.push(rmp_serde::from_slice(&rest[..len])?);
        bytes = &rest[len..];
    }
    Ok(items)
}

// ── Client-side reassembly ─────────────────────────────────────────────────

/// A backup reconstructed from a pull stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulledBackup {
    pub backup_id: String,
    pub attachment_holders: String,
    pub compaction: Vec<u8>,
    pub logs: Vec<PulledLog>,
}

/// One log reconstructed from a pull stream, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulledLog {
    pub log_id: String,
    pub attachment_holders: String,
    pub value: Vec<u8>,
}

/// Reconstruct a backup from a decoded pull stream.
///
/// Frames with a populated `compaction_chunk` concatenate, in order, to the
/// compaction; frames with a populated `log_chunk` concatenate per distinct
/// `log_id`, grouped by first appearance. The holders string is taken from
/// the first frame of each segment; repetitions on later frames are
/// tolerated. A non-ok terminal item discards the call.
pub fn reassemble(items: &[StreamItem]) -> Result<PulledBackup, String> {
    let mut pulled = PulledBackup::default();
    let mut saw_end = false;
    let mut saw_log = false;

    for item in items {
        if saw_end {
            return Err("stream item after terminal status".into());
        }
        let frame = match item {
            StreamItem::Frame(frame) => frame,
            StreamItem::End { error: Some(msg) } => return Err(msg.clone()),
            StreamItem::End { error: None } => {
                saw_end = true;
                continue;
            }
        };

        if pulled.backup_id.is_empty() && !frame.backup_id.is_empty() {
            pulled.backup_id = frame.backup_id.clone();
        }

        if !frame.compaction_chunk.is_empty() {
            if saw_log {
                return Err("compaction frame after log frames".into());
            }
            if pulled.compaction.is_empty() && !frame.attachment_holders.is_empty() {
                pulled.attachment_holders = frame.attachment_holders.clone();
            }
            pulled.compaction.extend_from_slice(&frame.compaction_chunk);
        }

        if !frame.log_chunk.is_empty() {
            if frame.log_id.is_empty() {
                return Err("log frame without a log id".into());
            }
            saw_log = true;
            match pulled.logs.iter_mut().find(|l| l.log_id == frame.log_id) {
                Some(log) => log.value.extend_from_slice(&frame.log_chunk),
                None => pulled.logs.push(PulledLog {
                    log_id: frame.log_id.clone(),
                    attachment_holders: frame.attachment_holders.clone(),
                    value: frame.log_chunk.clone(),
                }),
            }
        }
    }

    if !saw_end {
        return Err("stream ended without terminal status".into());
    }
    Ok(pulled)
}
