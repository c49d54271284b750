//! Realtime speech recognition over a persistent WebSocket.
//!
//! The recognizer speaks a duplex task protocol: the client opens a task
//! with `run-task`, streams raw PCM as binary frames, and receives
//! cumulative transcript snapshots as `result-generated` events until the
//! task finishes or fails. [`client::RecognizerClient`] owns the socket,
//! the task lifecycle, and an automatic reconnect loop; consumers observe
//! everything through a typed [`RecognizerEvent`] channel.

use std::fmt;

use thiserror::Error;

pub mod client;
pub mod config;
pub mod messages;
pub mod retry;

pub use client::RecognizerClient;
pub use config::RecognizerConfig;
pub use messages::{RecognizerMessage, TranscriptSnapshot, WordTiming};
pub use retry::{Backoff, ReconnectPolicy};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during recognition operations.
#[derive(Debug, Error)]
pub enum AsrError {
    /// Connection to the recognizer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The remote rejected or aborted the recognition task
    #[error("Task failed [{code}]: {message}")]
    TaskFailed { code: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for recognition operations.
pub type AsrResult<T> = Result<T, AsrError>;

// =============================================================================
// Task Status
// =============================================================================

/// Lifecycle state of the recognition task on the current transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    /// No task open on the transport
    #[default]
    Idle,
    /// `run-task` sent, waiting for `task-started`
    Starting,
    /// Task acknowledged; binary audio is accepted
    Running,
    /// Task ended normally via `task-finished`
    Finished,
    /// Task was rejected or aborted via `task-failed`
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "Idle"),
            TaskStatus::Starting => write!(f, "Starting"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Finished => write!(f, "Finished"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Typed events emitted by [`RecognizerClient`] on its event channel.
///
/// There is exactly one consumer: the receiver handed out by
/// [`RecognizerClient::take_events`]. No listener registration exists.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// The remote accepted the current task
    TaskStarted,
    /// A cumulative transcript snapshot for the in-progress utterance
    Transcript(TranscriptSnapshot),
    /// The current task ended normally
    TaskFinished,
    /// The current task was rejected or aborted by the remote
    TaskFailed {
        error_code: String,
        error_message: String,
    },
    /// The transport dropped unexpectedly; a reconnect may follow
    Disconnected { was_task_running: bool },
    /// A reconnect attempt succeeded and a fresh task is running
    Reconnected { attempt: u32 },
    /// All reconnect attempts were exhausted
    ReconnectFailed { attempts: u32, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Idle.to_string(), "Idle");
        assert_eq!(TaskStatus::Running.to_string(), "Running");
        assert_eq!(TaskStatus::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_error_display() {
        let err = AsrError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = AsrError::TaskFailed {
            code: "InvalidParameter".to_string(),
            message: "bad sample rate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Task failed [InvalidParameter]: bad sample rate"
        );

        let err = AsrError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }
}
