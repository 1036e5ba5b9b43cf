use thiserror::Error;

pub type Result<T> = std::result::Result<T, PullError>;

#[derive(Debug, Error)]
pub enum PullError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("no backup found for user id '{user_id}', backup id '{backup_id}'")]
    BackupNotFound { user_id: String, backup_id: String },

    #[error("blob store error: {0}")]
    BlobStore(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    #[error("termination error: {0}")]
    Termination(String),
}

impl PullError {
    /// True for errors that indicate a bug in the pull core rather than a
    /// bad request or a failing collaborator.
    pub fn is_invariant(&self) -> bool {
        matches!(self, PullError::Invariant(_))
    }
}
