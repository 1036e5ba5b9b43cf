use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use windlass_core::error::PullError;

/// Server error type that maps to HTTP status codes.
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        tracing::error!(status = %status, error = %message);
        (status, message).into_response()
    }
}

impl From<PullError> for ServerError {
    fn from(e: PullError) -> Self {
        match &e {
            PullError::InvalidRequest(_) => Self::BadRequest(e.to_string()),
            PullError::BackupNotFound { .. } => Self::NotFound(e.to_string()),
            PullError::BlobStore(_)
            | PullError::Metadata(_)
            | PullError::Invariant(_)
            | PullError::Termination(_) => Self::Internal(e.to_string()),
        }
    }
}
