//! Transcript reconciliation and text injection.
//!
//! The recognizer revises its transcript as an utterance progresses; this
//! module turns each revision into the minimal edit against what is
//! already on screen ([`reconciler`]) and applies edits to the external
//! sink one at a time ([`injector`]). The sink itself, and the
//! user-notification side channel, are external collaborators behind
//! traits.

use async_trait::async_trait;
use thiserror::Error;

pub mod injector;
pub mod reconciler;

pub use injector::SerializedInjector;
pub use reconciler::{EditOp, ReconcilerParams, TranscriptReconciler};

/// Errors from applying edits to the external text sink.
#[derive(Debug, Error)]
pub enum InjectionError {
    /// No focused input target to type into
    #[error("No active input target")]
    NoActiveTarget,

    /// The sink rejected or failed an edit operation
    #[error("Sink operation failed: {0}")]
    SinkFailed(String),

    /// The edit was interrupted by deactivation
    #[error("Injection cancelled")]
    Cancelled,
}

/// External text sink the session types into.
///
/// Edits are asynchronous and must not overlap; [`SerializedInjector`]
/// enforces that ordering. `copy_to_clipboard` is the degraded-mode side
/// channel used when direct injection fails.
#[async_trait]
pub trait TextSink: Send + Sync {
    /// Insert text at the current cursor position.
    async fn insert_text(&self, text: &str) -> Result<(), InjectionError>;

    /// Delete `count` characters backward from the cursor.
    async fn delete_backward(&self, count: usize) -> Result<(), InjectionError>;

    /// Whether a focused input target currently exists.
    fn has_active_target(&self) -> bool;

    /// Place text on the clipboard side channel.
    async fn copy_to_clipboard(&self, text: &str) -> Result<(), InjectionError>;
}

/// User-facing notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}
