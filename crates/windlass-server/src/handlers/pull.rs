use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use windlass_core::pull::{PullSession, ServerStream, StreamStep};
use windlass_protocol::{encode_item, PullRequest, PullResponse, StreamItem};

use crate::error::ServerError;
use crate::state::AppState;

/// How many encoded frames may sit between the drive loop and the HTTP
/// writer before the drive loop blocks. The chunk queue inside the session
/// provides the main backpressure; this only smooths the handoff.
const STREAM_BUFFER_FRAMES: usize = 16;

/// GET /users/{user_id}/backups/{backup_id}: stream one backup.
///
/// The response body is a sequence of length-delimited frames followed by a
/// terminal status item. Failures during setup (validation, unknown backup)
/// map to HTTP statuses; failures after the first byte surface in-band as
/// the terminal item's error.
pub async fn pull_backup(
    State(state): State<AppState>,
    Path((user_id, backup_id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let request = PullRequest { user_id, backup_id };
    let meta = Arc::clone(&state.inner.meta);
    let blobs = Arc::clone(&state.inner.blobs);
    let chunk_limit = state.inner.config.chunk_limit;

    // Metadata lookups hit the filesystem; keep them off the runtime.
    let session =
        tokio::task::spawn_blocking(move || PullSession::open(&request, &*meta, blobs, chunk_limit))
            .await
            .map_err(|e| ServerError::Internal(format!("pull setup task failed: {e}")))??;

    let (tx, rx) = mpsc::channel::<Result<Vec<u8>, Infallible>>(STREAM_BUFFER_FRAMES);
    tokio::task::spawn_blocking(move || drive_stream(session, tx));

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}

enum DriveOutcome {
    Complete,
    Failed(String),
    Disconnected,
}

/// The transport write loop: pump the session until it finishes or fails,
/// then emit the terminal item and run termination coordination.
fn drive_stream(session: PullSession, tx: mpsc::Sender<Result<Vec<u8>, Infallible>>) {
    let mut frames_sent = 0usize;
    let outcome = loop {
        let mut frame = PullResponse::default();
        match session.write_response(&mut frame) {
            Ok(StreamStep::Frame) => {
                let encoded = match encode_item(&StreamItem::Frame(frame)) {
                    Ok(encoded) => encoded,
                    Err(e) => break DriveOutcome::Failed(format!("frame encoding failed: {e}")),
                };
                if tx.blocking_send(Ok(encoded)).is_err() {
                    break DriveOutcome::Disconnected;
                }
                frames_sent += 1;
            }
            Ok(StreamStep::Finished) => break DriveOutcome::Complete,
            Err(e) => break DriveOutcome::Failed(e.to_string()),
        }
    };

    let call_error = match &outcome {
        DriveOutcome::Complete => {
            send_terminal(&tx, None);
            debug!(frames = frames_sent, "pull stream complete");
            None
        }
        DriveOutcome::Failed(msg) => {
            warn!(error = %msg, frames = frames_sent, "pull stream failed");
            send_terminal(&tx, Some(msg.clone()));
            Some(msg.clone())
        }
        DriveOutcome::Disconnected => {
            debug!(frames = frames_sent, "client disconnected mid-pull");
            Some("client disconnected".to_string())
        }
    };

    if let Err(e) = session.terminate(call_error.as_deref()) {
        // The stream error was already surfaced in-band; teardown problems
        // are only worth a log line.
        debug!(error = %e, "pull termination reported an error");
    }
}

fn send_terminal(tx: &mpsc::Sender<Result<Vec<u8>, Infallible>>, error: Option<String>) {
    if let Ok(encoded) = encode_item(&StreamItem::End { error }) {
        let _ = tx.blocking_send(Ok(encoded));
    }
}
