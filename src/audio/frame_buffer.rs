//! Frame accumulation buffer between the capture source and the transport.
//!
//! Capture chunks arrive small and irregular; the recognizer wants frames
//! of roughly 100ms. The buffer accumulates chunks and hands out one
//! concatenated frame once enough bytes are pending. When frames are not
//! being drained (no task running) it stays bounded by evicting the oldest
//! chunks, trading audio loss for bounded memory.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Minimum frame size handed to the transport: 100ms of 16kHz mono
/// 16-bit PCM.
pub const MIN_FRAME_BYTES: usize = 3200;

/// Accumulation cap: about 20 seconds of audio. Beyond this the oldest
/// chunks are dropped.
pub const MAX_BUFFER_BYTES: usize = 640_000;

/// Bounded chunk accumulator with drop-oldest overflow.
///
/// Overflow is a degraded-quality condition, not a fault: eviction is
/// logged but never surfaced as an error. The counters satisfy a
/// conservation law at all times:
/// `bytes_pushed == bytes_emitted + bytes_dropped + pending_bytes`.
#[derive(Debug)]
pub struct FrameBuffer {
    chunks: VecDeque<Bytes>,
    pending: usize,
    min_frame_bytes: usize,
    max_buffer_bytes: usize,
    bytes_pushed: u64,
    bytes_emitted: u64,
    bytes_dropped: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(MIN_FRAME_BYTES, MAX_BUFFER_BYTES)
    }
}

impl FrameBuffer {
    /// Create a buffer with explicit thresholds.
    pub fn new(min_frame_bytes: usize, max_buffer_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            pending: 0,
            min_frame_bytes,
            max_buffer_bytes,
            bytes_pushed: 0,
            bytes_emitted: 0,
            bytes_dropped: 0,
        }
    }

    /// Append one capture chunk, evicting oldest chunks if the cap would
    /// be exceeded.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }

        self.bytes_pushed += chunk.len() as u64;
        self.pending += chunk.len();
        self.chunks.push_back(chunk);

        if self.pending > self.max_buffer_bytes {
            let mut evicted = 0usize;
            while self.pending > self.max_buffer_bytes {
                match self.chunks.pop_front() {
                    Some(old) => {
                        self.pending -= old.len();
                        evicted += old.len();
                    }
                    None => break,
                }
            }
            self.bytes_dropped += evicted as u64;
            warn!(
                "Audio buffer overflow: dropped {} oldest bytes ({} pending)",
                evicted, self.pending
            );
        }
    }

    /// Take one concatenated frame if at least the minimum frame size is
    /// pending. The whole accumulation drains into the frame.
    pub fn take_frame(&mut self) -> Option<Bytes> {
        if self.pending < self.min_frame_bytes {
            return None;
        }
        self.drain()
    }

    /// Drain whatever is pending as a single frame, even below the
    /// minimum size. Used for the residual flush on deactivation.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.drain()
    }

    fn drain(&mut self) -> Option<Bytes> {
        if self.chunks.is_empty() {
            return None;
        }

        let mut frame = BytesMut::with_capacity(self.pending);
        for chunk in self.chunks.drain(..) {
            frame.extend_from_slice(&chunk);
        }
        self.pending = 0;
        self.bytes_emitted += frame.len() as u64;

        debug!("Emitting {} byte audio frame", frame.len());
        Some(frame.freeze())
    }

    /// Discard all pending chunks, counting them as dropped.
    pub fn clear(&mut self) {
        if self.pending > 0 {
            self.bytes_dropped += self.pending as u64;
            debug!("Cleared {} pending audio bytes", self.pending);
        }
        self.chunks.clear();
        self.pending = 0;
    }

    /// Bytes currently accumulated and not yet emitted.
    pub fn pending_bytes(&self) -> usize {
        self.pending
    }

    /// Total bytes ever pushed.
    pub fn bytes_pushed(&self) -> u64 {
        self.bytes_pushed
    }

    /// Total bytes ever emitted as frames.
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes_emitted
    }

    /// Total bytes dropped to overflow or clears.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[test]
    fn test_no_frame_below_threshold() {
        let mut buf = FrameBuffer::new(3200, 640_000);
        buf.push(chunk(1000));
        assert!(buf.take_frame().is_none());
        assert_eq!(buf.pending_bytes(), 1000);
    }

    #[test]
    fn test_frame_emitted_at_threshold() {
        let mut buf = FrameBuffer::new(3200, 640_000);
        buf.push(chunk(2000));
        buf.push(chunk(2000));

        let frame = buf.take_frame().unwrap();
        assert_eq!(frame.len(), 4000);
        assert_eq!(buf.pending_bytes(), 0);
        assert!(buf.take_frame().is_none());
    }

    #[test]
    fn test_flush_returns_undersized_remainder() {
        let mut buf = FrameBuffer::new(3200, 640_000);
        buf.push(chunk(100));
        let frame = buf.flush().unwrap();
        assert_eq!(frame.len(), 100);
        assert!(buf.flush().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_whole_chunks() {
        let mut buf = FrameBuffer::new(3200, 1000);
        buf.push(chunk(400));
        buf.push(chunk(400));
        buf.push(chunk(400));

        // 1200 pending exceeds 1000; the first chunk goes
        assert_eq!(buf.pending_bytes(), 800);
        assert_eq!(buf.bytes_dropped(), 400);
    }

    #[test]
    fn test_conservation_law() {
        let mut buf = FrameBuffer::new(3200, 8000);
        let mut emitted = 0u64;

        for i in 0..50 {
            buf.push(chunk(700 + i * 13));
            if i % 3 == 0 {
                if let Some(frame) = buf.take_frame() {
                    emitted += frame.len() as u64;
                }
            }
        }
        if let Some(frame) = buf.flush() {
            emitted += frame.len() as u64;
        }

        assert_eq!(emitted, buf.bytes_emitted());
        assert_eq!(
            buf.bytes_pushed(),
            buf.bytes_emitted() + buf.bytes_dropped() + buf.pending_bytes() as u64
        );
    }

    #[test]
    fn test_clear_counts_as_dropped() {
        let mut buf = FrameBuffer::new(3200, 640_000);
        buf.push(chunk(500));
        buf.clear();

        assert_eq!(buf.pending_bytes(), 0);
        assert_eq!(buf.bytes_dropped(), 500);
        assert_eq!(
            buf.bytes_pushed(),
            buf.bytes_emitted() + buf.bytes_dropped() + buf.pending_bytes() as u64
        );
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut buf = FrameBuffer::default();
        buf.push(Bytes::new());
        assert_eq!(buf.pending_bytes(), 0);
        assert_eq!(buf.bytes_pushed(), 0);
    }
}
