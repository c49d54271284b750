//! Audio capture boundary and buffering.
//!
//! Capture itself is an external collaborator behind the [`CaptureSource`]
//! trait: a push-based chunk stream with start/stop. The buffering between
//! capture and the transport lives here: [`FrameBuffer`] shapes chunks
//! into protocol-sized frames and [`ReconnectBuffer`] preserves continuity
//! while the transport is down.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod frame_buffer;
pub mod reconnect_buffer;

pub use frame_buffer::{FrameBuffer, MAX_BUFFER_BYTES, MIN_FRAME_BYTES};
pub use reconnect_buffer::{MAX_RECONNECT_BYTES, ReconnectBuffer};

/// Errors from the capture collaborator.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No capture device or input stream available
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The capture stream failed mid-session
    #[error("Capture stream failed: {0}")]
    StreamFailed(String),

    /// start() called while already capturing
    #[error("Already capturing")]
    AlreadyCapturing,

    /// stop() called while not capturing
    #[error("Not capturing")]
    NotCapturing,
}

/// Push-based audio capture source.
///
/// Implementations deliver raw 16-bit little-endian mono PCM chunks at
/// the configured sample rate. `start()` hands out the chunk receiver;
/// `stop()` ends the stream, closing the channel.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Begin capturing. Returns the chunk stream.
    async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>, CaptureError>;

    /// Stop capturing and close the chunk stream.
    async fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Normalized 0..1 volume level of a 16-bit little-endian PCM chunk.
///
/// RMS over the samples, scaled up 5x so ordinary speech registers near
/// the top of the range, clamped to 1.0.
pub fn rms_volume(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for sample in pcm.chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f64 / i16::MAX as f64;
        sum_squares += value * value;
        count += 1;
    }

    let rms = (sum_squares / count as f64).sqrt() as f32;
    (rms * 5.0).min(1.0)
}
