use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::error::{PullError, Result};
use crate::queue::{chunk_queue, ChunkQueue, ChunkSender};

/// Byte chunks pulled from the blob store, in blob order. Chunk sizes are
/// whatever the store hands back and are not client-controllable.
pub type BlobChunkStream = Box<dyn Iterator<Item = Result<Vec<u8>>> + Send + 'static>;

/// Read access to the content-addressed blob store.
pub trait BlobClient: Send + Sync {
    /// Open a blob by holder id and return its bytes as a chunk stream.
    fn get(&self, holder: &str) -> Result<BlobChunkStream>;
}

/// Observable state of a blob fetch: running until the producer thread has
/// finished (successfully or not), then done with an optional error.
enum FetchState {
    Running,
    Done { error: Option<String> },
}

/// Status holder shared between the producer thread and the consumer.
pub struct FetchStatus {
    state: Mutex<FetchState>,
}

impl FetchStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(FetchState::Running),
        }
    }

    /// Record the terminal outcome. Called exactly once, by the producer,
    /// before it enqueues the end-of-blob sentinel, so a consumer that has
    /// observed the sentinel always sees a settled status.
    fn mark_done(&self, error: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = FetchState::Done { error };
    }

    pub fn is_done(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(*state, FetchState::Done { .. })
    }

    /// The fetch error, if the fetch has failed.
    pub fn error(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            FetchState::Done { error } => error.clone(),
            FetchState::Running => None,
        }
    }
}

/// An in-flight blob fetch: a producer thread draining one blob into a
/// bounded chunk queue, plus the handles the consumer needs: the queue's
/// receiving end, the status holder, and a one-shot completion signal.
pub struct BlobFetch {
    chunks: ChunkQueue,
    status: Arc<FetchStatus>,
    /// Completion signal: the producer holds the sender and never sends;
    /// the channel disconnects when the producer exits.
    done: Receiver<()>,
}

impl BlobFetch {
    /// Spawn a producer thread that streams the blob at `holder` into a
    /// fresh chunk queue, then enqueues the sentinel and settles the status.
    /// The sentinel is enqueued on failure too, so the consumer always
    /// unblocks.
    pub fn spawn(client: Arc<dyn BlobClient>, holder: String) -> BlobFetch {
        let (tx, chunks) = chunk_queue();
        let status = Arc::new(FetchStatus::new());
        let (done_tx, done) = crossbeam_channel::bounded::<()>(1);

        let thread_status = Arc::clone(&status);
        std::thread::spawn(move || {
            // Owned by the thread so the channel disconnects on exit,
            // including on panic.
            let _done_tx = done_tx;
            let error = run_fetch(&*client, &holder, &tx);
            if let Some(msg) = &error {
                debug!(holder = %holder, error = %msg, "blob fetch failed");
            }
            thread_status.mark_done(error);
            tx.send_sentinel();
        });

        BlobFetch {
            chunks,
            status,
            done,
        }
    }

    pub fn chunks(&self) -> &ChunkQueue {
        &self.chunks
    }

    pub fn status(&self) -> &FetchStatus {
        &self.status
    }

    /// Fail if the fetch has recorded an error. A still-running fetch is ok.
    pub fn check_ok(&self) -> Result<()> {
        match self.status.error() {
            Some(msg) => Err(PullError::BlobStore(msg)),
            None => Ok(()),
        }
    }

    /// Tear the fetch down: release the queue so a producer blocked on a
    /// full queue can exit, wait for it to finish, and report its outcome.
    pub fn finish(self) -> Result<()> {
        drop(self.chunks);
        // Blocks until the producer drops its end; an error just means the
        // producer is already gone.
        let _ = self.done.recv();
        if !self.status.is_done() {
            return Err(PullError::Termination(
                "blob source has not terminated properly".into(),
            ));
        }
        match self.status.error() {
            Some(msg) => Err(PullError::BlobStore(msg)),
            None => Ok(()),
        }
    }
}

/// Drain the blob's chunk stream into the queue. Returns the error message
/// on failure, `None` on success or when the consumer went away.
fn run_fetch(client: &dyn BlobClient, holder: &str, tx: &ChunkSender) -> Option<String> {
    let stream = match client.get(holder) {
        Ok(stream) => stream,
        Err(e) => return Some(e.to_string()),
    };
    for chunk in stream {
        match chunk {
            // An empty chunk would read as the sentinel; skip it.
            Ok(data) if data.is_empty() => continue,
            Ok(data) => {
                if !tx.send(data) {
                    // Consumer dropped the queue: a deliberate teardown,
                    // not a blob store failure.
                    return None;
                }
            }
            Err(e) => return Some(e.to_string()),
        }
    }
    None
}
