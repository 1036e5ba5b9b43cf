//! In-memory fakes and drive helpers shared by the pull scenario tests.

use std::collections::HashMap;
use std::sync::Arc;

use windlass_protocol::{PullRequest, PullResponse, StreamItem};

use crate::error::{PullError, Result};
use crate::pull::{PullSession, ServerStream, StreamStep};
use crate::records::{BackupRecord, LogRecord, MetadataStore};
use crate::source::{BlobChunkStream, BlobClient};

pub fn request(user_id: &str, backup_id: &str) -> PullRequest {
    PullRequest {
        user_id: user_id.into(),
        backup_id: backup_id.into(),
    }
}

pub fn backup_record(user_id: &str, backup_id: &str, holder: &str) -> BackupRecord {
    BackupRecord {
        user_id: user_id.into(),
        backup_id: backup_id.into(),
        compaction_holder: holder.into(),
        attachment_holders: format!("att-{backup_id}"),
    }
}

pub fn inline_log(backup_id: &str, log_id: &str, value: &[u8]) -> LogRecord {
    LogRecord {
        backup_id: backup_id.into(),
        log_id: log_id.into(),
        persisted_in_blob: false,
        value: value.to_vec(),
        attachment_holders: format!("att-{log_id}"),
    }
}

pub fn blob_log(backup_id: &str, log_id: &str, holder: &str) -> LogRecord {
    LogRecord {
        backup_id: backup_id.into(),
        log_id: log_id.into(),
        persisted_in_blob: true,
        value: holder.as_bytes().to_vec(),
        attachment_holders: format!("att-{log_id}"),
    }
}

// ---------------------------------------------------------------------------
// In-memory metadata store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMetadataStore {
    backups: HashMap<(String, String), BackupRecord>,
    logs: HashMap<String, Vec<LogRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_backup(&mut self, record: BackupRecord) {
        self.backups.insert(
            (record.user_id.clone(), record.backup_id.clone()),
            record,
        );
    }

    pub fn insert_log(&mut self, record: LogRecord) {
        self.logs
            .entry(record.backup_id.clone())
            .or_default()
            .push(record);
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn find_backup(&self, user_id: &str, backup_id: &str) -> Result<Option<BackupRecord>> {
        Ok(self
            .backups
            .get(&(user_id.to_string(), backup_id.to_string()))
            .cloned())
    }

    fn find_logs(&self, backup_id: &str) -> Result<Vec<LogRecord>> {
        let mut logs = self.logs.get(backup_id).cloned().unwrap_or_default();
        logs.sort_by(|a, b| a.log_id.cmp(&b.log_id));
        Ok(logs)
    }
}

// ---------------------------------------------------------------------------
// In-memory blob client
// ---------------------------------------------------------------------------

/// Fail the fetch of `holder` after yielding `after_bytes` of its data.
pub struct FailPoint {
    pub holder: String,
    pub after_bytes: usize,
    pub message: String,
}

pub struct MemoryBlobClient {
    blobs: HashMap<String, Vec<u8>>,
    /// Size of the chunks the client yields; the last chunk may be shorter.
    pub chunk_size: usize,
    pub fail: Option<FailPoint>,
}

impl MemoryBlobClient {
    pub fn new() -> Self {
        Self {
            blobs: HashMap::new(),
            chunk_size: 1000,
            fail: None,
        }
    }

    pub fn insert(&mut self, holder: &str, data: Vec<u8>) {
        self.blobs.insert(holder.to_string(), data);
    }
}

impl Default for MemoryBlobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobClient for MemoryBlobClient {
    fn get(&self, holder: &str) -> Result<BlobChunkStream> {
        let data = self
            .blobs
            .get(holder)
            .ok_or_else(|| PullError::BlobStore(format!("no blob for holder '{holder}'")))?;

        let mut data = data.as_slice();
        let mut budget = usize::MAX;
        let mut failure = None;
        if let Some(fail) = &self.fail {
            if fail.holder == holder {
                budget = fail.after_bytes;
                failure = Some(PullError::BlobStore(fail.message.clone()));
            }
        }

        let mut items: Vec<Result<Vec<u8>>> = Vec::new();
        while !data.is_empty() && budget > 0 {
            let take = self.chunk_size.min(data.len()).min(budget);
            items.push(Ok(data[..take].to_vec()));
            data = &data[take..];
            budget -= take;
        }
        if let Some(err) = failure {
            items.push(Err(err));
        }
        Ok(Box::new(items.into_iter()))
    }
}

// ---------------------------------------------------------------------------
// Drive helpers
// ---------------------------------------------------------------------------

/// Run the transport write loop to completion, collecting every emitted
/// frame and the terminal outcome.
pub fn drive(session: &PullSession) -> (Vec<PullResponse>, Result<()>) {
    let mut frames = Vec::new();
    loop {
        let mut out = PullResponse::default();
        match session.write_response(&mut out) {
            Ok(StreamStep::Frame) => frames.push(out),
            Ok(StreamStep::Finished) => return (frames, Ok(())),
            Err(e) => return (frames, Err(e)),
        }
    }
}

/// Every frame must keep body + metadata within the chunk limit.
pub fn assert_frame_caps(frames: &[PullResponse], chunk_limit: usize) {
    for (i, frame) in frames.iter().enumerate() {
        let total = frame.body().len() + frame.metadata_overhead();
        assert!(
            total <= chunk_limit,
            "frame {i} exceeds chunk limit: {total} > {chunk_limit}"
        );
    }
}

/// Wrap frames as a complete, successful wire stream for reassembly.
pub fn as_stream(frames: &[PullResponse]) -> Vec<StreamItem> {
    frames
        .iter()
        .cloned()
        .map(StreamItem::Frame)
        .chain(std::iter::once(StreamItem::End { error: None }))
        .collect()
}

/// Open a session over the given fixtures with a small chunk limit.
pub fn open_session(
    meta: &MemoryMetadataStore,
    blobs: MemoryBlobClient,
    user_id: &str,
    backup_id: &str,
    chunk_limit: usize,
) -> Result<PullSession> {
    PullSession::open(
        &request(user_id, backup_id),
        meta,
        Arc::new(blobs),
        chunk_limit,
    )
}
