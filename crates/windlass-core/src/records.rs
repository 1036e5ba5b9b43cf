use serde::{Deserialize, Serialize};

use crate::error::{PullError, Result};

/// A backup's metadata record, identified by `(user_id, backup_id)`.
///
/// The compaction artifact itself lives in the blob store under
/// `compaction_holder`; `attachment_holders` is an opaque string the client
/// uses to locate the backup's attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub user_id: String,
    pub backup_id: String,
    pub compaction_holder: String,
    #[serde(default)]
    pub attachment_holders: String,
}

/// One incremental log belonging to a backup.
///
/// When `persisted_in_blob` is true, `value` holds a blob holder id and the
/// log's bytes live in the blob store; otherwise `value` is the log payload
/// itself, stored inline in the metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub backup_id: String,
    pub log_id: String,
    pub persisted_in_blob: bool,
    #[serde(default)]
    pub value: Vec<u8>,
    #[serde(default)]
    pub attachment_holders: String,
}

impl LogRecord {
    /// The blob holder for a blob-persisted log.
    ///
    /// Holders are ids minted by the blob store, so a non-UTF-8 value means
    /// the record is corrupt.
    pub fn holder(&self) -> Result<&str> {
        debug_assert!(self.persisted_in_blob);
        std::str::from_utf8(&self.value)
            .map_err(|_| PullError::Invariant("blob holder is not valid utf-8"))
    }
}

/// Read access to backup metadata.
///
/// `find_logs` must return a backup's logs ordered by `log_id`,
/// lexicographically ascending over bytes. The pull stream emits logs in
/// exactly the returned order, so a stable ordering key is part of the
/// contract, not an implementation detail.
pub trait MetadataStore: Send + Sync {
    /// Look up one backup record. `None` when no such backup exists for the
    /// user.
    fn find_backup(&self, user_id: &str, backup_id: &str) -> Result<Option<BackupRecord>>;

    /// All log records of a backup, ordered by `log_id`.
    fn find_logs(&self, backup_id: &str) -> Result<Vec<LogRecord>>;
}
