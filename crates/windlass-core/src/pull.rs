use std::sync::{Arc, Mutex};

use tracing::debug;
use windlass_protocol::{
    PullRequest, PullResponse, FIELD_ATTACHMENT_HOLDERS, FIELD_BACKUP_ID, FIELD_LOG_ID,
};

use crate::error::{PullError, Result};
use crate::packer::FramePacker;
use crate::records::{BackupRecord, LogRecord, MetadataStore};
use crate::source::{BlobClient, BlobFetch};

/// Outcome of one write invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    /// The output frame was populated; keep writing.
    Frame,
    /// The stream is complete; no frame was populated.
    Finished,
}

/// A server-side response stream driven by the transport's write loop.
///
/// The transport calls `write_response` repeatedly, possibly from different
/// worker threads, until it returns [`StreamStep::Finished`] or an error,
/// and then runs `terminate` exactly once per call outcome.
pub trait ServerStream: Send + Sync {
    fn write_response(&self, out: &mut PullResponse) -> Result<StreamStep>;

    /// Synchronize teardown with any in-flight blob source and surface the
    /// outer call's error, if the transport recorded one. Idempotent: only
    /// the first invocation does work.
    fn terminate(&self, call_error: Option<&str>) -> Result<()>;
}

/// Per-log progress while the session is emitting log segments.
struct LogsState {
    /// Next log to open, or `logs.len()` when all logs have been consumed.
    index: usize,
    /// Index of the blob log currently being streamed. `None` between logs;
    /// inline logs never occupy this because they are emitted whole.
    current: Option<usize>,
    /// Set once the active blob source's end-of-blob sentinel was read.
    end_of_queue: bool,
    /// Log id of the most recently finished log, for the final stash flush.
    previous_log_id: Option<String>,
}

impl LogsState {
    fn next_log(&mut self, finished_log_id: &str) {
        self.index += 1;
        self.previous_log_id = Some(finished_log_id.to_string());
        self.current = None;
        self.end_of_queue = false;
    }
}

/// Session phase. Transitions are monotonic: Compaction → Logs → Done.
enum Phase {
    Compaction {
        /// True once the compaction's blob source has been started.
        started: bool,
    },
    Logs(LogsState),
    Done,
}

struct SessionState {
    backup: BackupRecord,
    logs: Vec<LogRecord>,
    packer: FramePacker,
    /// The active blob source. At most one exists at any time; it is
    /// replaced only after its segment has been fully drained.
    fetch: Option<BlobFetch>,
    phase: Phase,
    terminated: bool,
}

/// One pull call's state machine.
///
/// Construction performs the INIT work: request validation and the metadata
/// snapshot. All later state is guarded by a single mutex held for the whole
/// of each `write_response` / `terminate` invocation, which both serializes
/// invocations and publishes state between the transport's worker threads.
pub struct PullSession {
    blobs: Arc<dyn BlobClient>,
    state: Mutex<SessionState>,
}

impl PullSession {
    /// Validate the request and load the backup's records. The returned
    /// session is ready for its first `write_response`.
    pub fn open(
        request: &PullRequest,
        meta: &dyn MetadataStore,
        blobs: Arc<dyn BlobClient>,
        chunk_limit: usize,
    ) -> Result<PullSession> {
        if request.user_id.is_empty() {
            return Err(PullError::InvalidRequest("no user id provided"));
        }
        if request.backup_id.is_empty() {
            return Err(PullError::InvalidRequest("no backup id provided"));
        }

        let backup = meta
            .find_backup(&request.user_id, &request.backup_id)?
            .ok_or_else(|| PullError::BackupNotFound {
                user_id: request.user_id.clone(),
                backup_id: request.backup_id.clone(),
            })?;
        let logs = meta.find_logs(&request.backup_id)?;
        debug!(
            backup_id = %backup.backup_id,
            logs = logs.len(),
            chunk_limit,
            "pull session opened"
        );

        Ok(PullSession {
            blobs,
            state: Mutex::new(SessionState {
                backup,
                logs,
                packer: FramePacker::new(chunk_limit),
                fetch: None,
                phase: Phase::Compaction { started: false },
                terminated: false,
            }),
        })
    }

    fn write_locked(&self, st: &mut SessionState, out: &mut PullResponse) -> Result<StreamStep> {
        *out = PullResponse::default();

        // The loop exists for the in-invocation fallthrough from the end of
        // the compaction into the logs: a frame must never go out empty, so
        // when the compaction finishes with nothing left to flush, the same
        // invocation continues with the first log.
        loop {
            match &mut st.phase {
                Phase::Compaction { started } => {
                    let mut extra = 0usize;
                    out.backup_id = st.backup.backup_id.clone();
                    extra += FIELD_BACKUP_ID.len() + st.backup.backup_id.len();

                    if !*started {
                        extra +=
                            FIELD_ATTACHMENT_HOLDERS.len() + st.backup.attachment_holders.len();
                        out.attachment_holders = st.backup.attachment_holders.clone();
                        st.fetch = Some(BlobFetch::spawn(
                            Arc::clone(&self.blobs),
                            st.backup.compaction_holder.clone(),
                        ));
                        *started = true;
                    }
                    let fetch = st
                        .fetch
                        .as_ref()
                        .ok_or(PullError::Invariant("no active blob source for compaction"))?;

                    let mut data_chunk = Vec::new();
                    if st.packer.buffer_len() < st.packer.chunk_limit() {
                        data_chunk = fetch.chunks().recv();
                    }
                    if !data_chunk.is_empty()
                        || st.packer.buffer_len() + extra >= st.packer.chunk_limit()
                    {
                        out.compaction_chunk = st.packer.prepare(data_chunk, extra)?;
                        return Ok(StreamStep::Frame);
                    }

                    // The compaction is ending: the sentinel was read and the
                    // stash fits in one frame.
                    if !fetch.chunks().is_empty() {
                        return Err(PullError::Invariant(
                            "dangling data discovered after reading compaction",
                        ));
                    }
                    fetch.check_ok()?;
                    st.phase = Phase::Logs(LogsState {
                        index: 0,
                        current: None,
                        end_of_queue: false,
                        previous_log_id: None,
                    });
                    if !st.packer.buffer_is_empty() {
                        out.compaction_chunk = st.packer.take_buffer();
                        return Ok(StreamStep::Frame);
                    }
                }

                Phase::Logs(ls) => {
                    if st.logs.is_empty() {
                        st.phase = Phase::Done;
                        return Ok(StreamStep::Finished);
                    }
                    if ls.index == st.logs.len() {
                        // End of the logs collection: terminate, flushing any
                        // stashed bytes of the last log first.
                        if let Some(fetch) = &st.fetch {
                            if !fetch.chunks().is_empty() {
                                return Err(PullError::Invariant(
                                    "dangling data discovered after reading logs",
                                ));
                            }
                        }
                        if !st.packer.buffer_is_empty() {
                            out.log_id = ls
                                .previous_log_id
                                .clone()
                                .ok_or(PullError::Invariant("stashed bytes without a log"))?;
                            out.log_chunk = st.packer.take_buffer();
                            return Ok(StreamStep::Frame);
                        }
                        st.phase = Phase::Done;
                        return Ok(StreamStep::Finished);
                    }
                    if ls.index > st.logs.len() {
                        return Err(PullError::Invariant("log index out of bound"));
                    }

                    let mut extra = 0usize;
                    if ls.current.is_none() {
                        // Open the next log. The holders string rides only on
                        // a segment's first frame.
                        let log = &st.logs[ls.index];
                        out.attachment_holders = log.attachment_holders.clone();
                        extra += FIELD_ATTACHMENT_HOLDERS.len() + log.attachment_holders.len();

                        if log.persisted_in_blob {
                            let holder = log.holder()?.to_string();
                            st.fetch = Some(BlobFetch::spawn(Arc::clone(&self.blobs), holder));
                            ls.current = Some(ls.index);
                            ls.end_of_queue = false;
                        } else {
                            // Inline log: emit it whole and move on.
                            out.log_id = log.log_id.clone();
                            out.log_chunk = log.value.clone();
                            let log_id = log.log_id.clone();
                            ls.next_log(&log_id);
                            return Ok(StreamStep::Frame);
                        }
                    }

                    // Build a frame for the active blob log.
                    let current = ls
                        .current
                        .ok_or(PullError::Invariant("no current log for blob read"))?;
                    let log = &st.logs[current];
                    extra += FIELD_LOG_ID.len() + log.log_id.len();
                    out.backup_id = log.backup_id.clone();
                    extra += FIELD_BACKUP_ID.len() + log.backup_id.len();
                    out.log_id = log.log_id.clone();

                    let fetch = st
                        .fetch
                        .as_ref()
                        .ok_or(PullError::Invariant("no active blob source for log"))?;
                    let mut data_chunk = Vec::new();
                    if st.packer.buffer_len() < st.packer.chunk_limit() && !ls.end_of_queue {
                        data_chunk = fetch.chunks().recv();
                    }
                    ls.end_of_queue = ls.end_of_queue || data_chunk.is_empty();

                    let body = st.packer.prepare(data_chunk, extra)?;
                    fetch.check_ok()?;

                    if body.is_empty() {
                        // The log is exhausted: advance, emitting a frame
                        // that carries metadata only.
                        let log_id = log.log_id.clone();
                        ls.next_log(&log_id);
                    } else {
                        out.log_chunk = body;
                    }
                    return Ok(StreamStep::Frame);
                }

                Phase::Done => return Ok(StreamStep::Finished),
            }
        }
    }
}

impl ServerStream for PullSession {
    fn write_response(&self, out: &mut PullResponse) -> Result<StreamStep> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.write_locked(&mut guard, out)
    }

    fn terminate(&self, call_error: Option<&str>) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let st = &mut *guard;
        if st.terminated {
            return Ok(());
        }
        st.terminated = true;
        st.phase = Phase::Done;

        // Release the queue and wait for the blob source to wind down; a
        // source blocked on a full queue exits once the queue is gone.
        if let Some(fetch) = st.fetch.take() {
            fetch.finish()?;
        }
        if let Some(msg) = call_error {
            return Err(PullError::Termination(msg.to_string()));
        }
        Ok(())
    }
}
