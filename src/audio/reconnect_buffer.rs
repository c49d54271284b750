//! Continuity buffer for audio captured while the transport is down.
//!
//! Alive only between an unexpected disconnect and a successful resume.
//! Audio that would have gone to the socket queues here instead; after a
//! fresh task is running the whole window drains as one frame so the
//! utterance resumes with minimal loss.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Retention cap: about 10 seconds of 16kHz mono 16-bit PCM. A reconnect
/// that takes longer than this loses the oldest audio first.
pub const MAX_RECONNECT_BYTES: usize = 320_000;

/// FIFO byte-bounded buffer, oldest chunks evicted first.
#[derive(Debug)]
pub struct ReconnectBuffer {
    chunks: VecDeque<Bytes>,
    pending: usize,
    max_bytes: usize,
}

impl Default for ReconnectBuffer {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_BYTES)
    }
}

impl ReconnectBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            pending: 0,
            max_bytes,
        }
    }

    /// Enqueue one chunk, evicting oldest chunks to stay under the cap.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }

        self.pending += chunk.len();
        self.chunks.push_back(chunk);

        if self.pending > self.max_bytes {
            let mut evicted = 0usize;
            while self.pending > self.max_bytes {
                match self.chunks.pop_front() {
                    Some(old) => {
                        self.pending -= old.len();
                        evicted += old.len();
                    }
                    None => break,
                }
            }
            warn!(
                "Reconnection buffer overflow: discarded {} oldest bytes",
                evicted
            );
        }
    }

    /// Drain everything as one concatenated frame and clear the buffer.
    /// Returns `None` when nothing was held.
    pub fn drain(&mut self) -> Option<Bytes> {
        if self.chunks.is_empty() {
            return None;
        }

        let mut frame = BytesMut::with_capacity(self.pending);
        for chunk in self.chunks.drain(..) {
            frame.extend_from_slice(&chunk);
        }
        self.pending = 0;

        debug!("Replaying {} buffered bytes after reconnect", frame.len());
        Some(frame.freeze())
    }

    /// Discard all held chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending = 0;
    }

    /// Bytes currently held.
    pub fn pending_bytes(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
