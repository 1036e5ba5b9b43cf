use crossbeam_channel::{Receiver, Sender};

/// Capacity of the chunk queue between a blob source and the frame writer.
/// Bounds the memory a fast blob store can buffer ahead of a slow client.
pub const QUEUE_CAPACITY: usize = 100;

/// Create a bounded chunk queue. The sender side goes to the blob source
/// thread, the receiver side stays with the pull state machine.
pub fn chunk_queue() -> (ChunkSender, ChunkQueue) {
    let (tx, rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
    (ChunkSender { tx }, ChunkQueue { rx })
}

/// Producer half of the chunk queue. Writes block while the queue is full.
pub struct ChunkSender {
    tx: Sender<Vec<u8>>,
}

impl ChunkSender {
    /// Enqueue one chunk, blocking while the queue is full. Returns false
    /// when the consumer has gone away, which the producer treats as a
    /// request to stop.
    pub fn send(&self, chunk: Vec<u8>) -> bool {
        self.tx.send(chunk).is_ok()
    }

    /// Enqueue the end-of-blob sentinel (an empty chunk).
    pub fn send_sentinel(&self) -> bool {
        self.send(Vec::new())
    }
}

/// Consumer half of the chunk queue. Reads block while the queue is empty.
pub struct ChunkQueue {
    rx: Receiver<Vec<u8>>,
}

impl ChunkQueue {
    /// Dequeue one chunk, blocking while the queue is empty.
    ///
    /// An empty chunk is the end-of-blob sentinel. A disconnected queue
    /// (the producer exited and its final sentinel was already consumed)
    /// also reads as the sentinel, so a repeated read past the end of a
    /// blob can never block forever.
    pub fn recv(&self) -> Vec<u8> {
        self.rx.recv().unwrap_or_default()
    }

    /// True when no chunks are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
