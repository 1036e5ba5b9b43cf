//! Filesystem-backed implementations of the metadata and blob store
//! contracts the pull core consumes.
//!
//! Layout under the data directory:
//!
//! ```text
//! backups/<user_id>/<backup_id>.json    one BackupRecord per file
//! logs/<backup_id>/<log_id>.json        one LogRecord per file
//! blobs/<holder>                        raw blob bytes
//! ```

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use windlass_core::error::{PullError, Result};
use windlass_core::records::{BackupRecord, LogRecord, MetadataStore};
use windlass_core::source::{BlobChunkStream, BlobClient};

/// Read buffer size for streaming blob files.
const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Reject identifiers that could escape the data directory.
fn validate_id(id: &str, what: &str) -> Result<()> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(PullError::Metadata(format!("unsafe {what}: '{id}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metadata store
// ---------------------------------------------------------------------------

pub struct LocalMetadataStore {
    root: PathBuf,
}

impl LocalMetadataStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.to_path_buf(),
        }
    }

    fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PullError::Metadata(e.to_string())),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| PullError::Metadata(format!("corrupt record {}: {e}", path.display())))
    }
}

impl MetadataStore for LocalMetadataStore {
    fn find_backup(&self, user_id: &str, backup_id: &str) -> Result<Option<BackupRecord>> {
        validate_id(user_id, "user id")?;
        validate_id(backup_id, "backup id")?;
        let path = self
            .root
            .join("backups")
            .join(user_id)
            .join(format!("{backup_id}.json"));
        Self::read_record(&path)
    }

    fn find_logs(&self, backup_id: &str) -> Result<Vec<LogRecord>> {
        validate_id(backup_id, "backup id")?;
        let dir = self.root.join("logs").join(backup_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PullError::Metadata(e.to_string())),
        };

        let mut logs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PullError::Metadata(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(log) = Self::read_record::<LogRecord>(&path)? {
                logs.push(log);
            }
        }
        // The pull stream emits logs in exactly this order.
        logs.sort_by(|a, b| a.log_id.cmp(&b.log_id));
        Ok(logs)
    }
}

// ---------------------------------------------------------------------------
// Blob client
// ---------------------------------------------------------------------------

pub struct LocalBlobClient {
    root: PathBuf,
}

impl LocalBlobClient {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.to_path_buf(),
        }
    }
}

impl BlobClient for LocalBlobClient {
    fn get(&self, holder: &str) -> Result<BlobChunkStream> {
        validate_id(holder, "blob holder")
            .map_err(|_| PullError::BlobStore(format!("unsafe blob holder: '{holder}'")))?;
        let path = self.root.join("blobs").join(holder);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PullError::BlobStore(format!(
                    "no blob for holder '{holder}'"
                )));
            }
            Err(e) => return Err(PullError::BlobStore(e.to_string())),
        };
        Ok(Box::new(FileChunks { file, failed: false }))
    }
}

/// Streams a blob file as fixed-size read chunks; the last may be shorter.
struct FileChunks {
    file: fs::File,
    failed: bool,
}

impl Iterator for FileChunks {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match self.file.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(PullError::BlobStore(e.to_string())))
            }
        }
    }
}
