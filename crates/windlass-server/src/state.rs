use std::sync::Arc;

use windlass_core::records::MetadataStore;
use windlass_core::source::BlobClient;

use crate::config::ServerSection;

/// Shared application state, wrapped in Arc for axum handlers.
///
/// The store clients are trait objects so tests can substitute in-memory
/// fakes for the filesystem-backed defaults.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub config: ServerSection,
    pub meta: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobClient>,
}

impl AppState {
    pub fn new(
        config: ServerSection,
        meta: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                meta,
                blobs,
            }),
        }
    }
}
