use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use tower::ServiceExt;

use windlass_core::records::{BackupRecord, LogRecord};

use crate::config::ServerSection;
use crate::state::AppState;
use crate::store::{LocalBlobClient, LocalMetadataStore};

/// Create a wired-up router backed by a temp data directory.
pub fn setup_app(chunk_limit: usize) -> (Router, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let data_dir = tmp.path().to_path_buf();

    let config = ServerSection {
        data_dir: data_dir.to_string_lossy().into_owned(),
        chunk_limit,
        ..Default::default()
    };

    let meta = Arc::new(LocalMetadataStore::new(&data_dir));
    let blobs = Arc::new(LocalBlobClient::new(&data_dir));
    let state = AppState::new(config, meta, blobs);
    (super::router(state), tmp)
}

pub fn seed_backup(dir: &Path, record: &BackupRecord) {
    let path = dir.join("backups").join(&record.user_id);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(
        path.join(format!("{}.json", record.backup_id)),
        serde_json::to_vec(record).unwrap(),
    )
    .unwrap();
}

pub fn seed_log(dir: &Path, record: &LogRecord) {
    let path = dir.join("logs").join(&record.backup_id);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(
        path.join(format!("{}.json", record.log_id)),
        serde_json::to_vec(record).unwrap(),
    )
    .unwrap();
}

pub fn seed_blob(dir: &Path, holder: &str, data: &[u8]) {
    let path = dir.join("blobs");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(holder), data).unwrap();
}

/// Send a GET request through the router.
pub async fn get(router: Router, path: &str) -> axum::response::Response {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    router.oneshot(req).await.unwrap()
}

/// Read a full response body into `Vec<u8>`.
pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}
