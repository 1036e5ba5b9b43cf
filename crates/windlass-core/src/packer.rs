use crate::error::{PullError, Result};

/// Accumulates blob chunks into frame bodies capped at the chunk limit.
///
/// The blob store does not align its chunk boundaries with frames, so bytes
/// that would push a frame past the limit are stashed in an internal buffer
/// and carried into the next frame. The limit covers the body *plus* the
/// frame's metadata, passed in as `extra`.
pub struct FramePacker {
    chunk_limit: usize,
    buffer: Vec<u8>,
}

impl FramePacker {
    pub fn new(chunk_limit: usize) -> Self {
        Self {
            chunk_limit,
            buffer: Vec::new(),
        }
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the stashed bytes, leaving the buffer empty. Flushing the stash
    /// into a frame must go through here so the same bytes cannot be sent
    /// twice.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Build a frame body from the stashed bytes plus `incoming`, keeping
    /// body size + `extra` within the chunk limit. Overflow goes back into
    /// the stash for the next frame.
    pub fn prepare(&mut self, incoming: Vec<u8>, extra: usize) -> Result<Vec<u8>> {
        if incoming.len() > self.chunk_limit {
            return Err(PullError::Invariant(
                "received data chunk bigger than the chunk limit",
            ));
        }

        let mut chunk = self.take_buffer();
        chunk.extend_from_slice(&incoming);

        let real_size = chunk.len() + extra;
        if real_size <= self.chunk_limit {
            return Ok(chunk);
        }

        let bytes_to_stash = real_size - self.chunk_limit;
        if bytes_to_stash > chunk.len() {
            // Only reachable when `extra` alone exceeds the limit, which
            // means the limit is smaller than a frame's metadata.
            return Err(PullError::Invariant(
                "new data chunk incorrectly calculated",
            ));
        }
        self.buffer = chunk.split_off(chunk.len() - bytes_to_stash);

        if chunk.len() > self.chunk_limit {
            return Err(PullError::Invariant(
                "new data chunk incorrectly calculated",
            ));
        }
        Ok(chunk)
    }
}
