//! Session orchestration.
//!
//! One session spans one activation cycle: activate, dictate, deactivate.
//! [`controller::SessionController`] owns the authoritative session state
//! and wires capture, buffering, the recognizer client, reconciliation,
//! and injection together.

use std::fmt;

use thiserror::Error;

use crate::asr::AsrError;
use crate::audio::CaptureError;
use crate::text::InjectionError;

pub mod controller;

pub use controller::{SessionConfig, SessionController};

/// Errors surfaced by session orchestration.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Recognizer connection or task failure
    #[error("Recognizer error: {0}")]
    Asr(#[from] AsrError),

    /// Audio capture failure
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Text injection failure
    #[error("Injection error: {0}")]
    Injection(#[from] InjectionError),

    /// Orchestration invariant broken
    #[error("Session error: {0}")]
    Internal(String),
}

/// Authoritative session phase.
///
/// `Activating` and `Deactivating` are held only inside the transition
/// critical section; observers normally see `Idle`, `Active`, or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session running
    #[default]
    Idle,
    /// activate() in progress
    Activating,
    /// Dictation running
    Active,
    /// deactivate() in progress
    Deactivating,
    /// A fault occurred; delayed recovery will return to Idle
    Error,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::Activating => write!(f, "Activating"),
            SessionPhase::Active => write!(f, "Active"),
            SessionPhase::Deactivating => write!(f, "Deactivating"),
            SessionPhase::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Idle.to_string(), "Idle");
        assert_eq!(SessionPhase::Active.to_string(), "Active");
        assert_eq!(SessionPhase::Error.to_string(), "Error");
    }

    #[test]
    fn test_error_conversions() {
        let err: SessionError = AsrError::NotConnected.into();
        assert!(matches!(err, SessionError::Asr(_)));

        let err: SessionError = CaptureError::AlreadyCapturing.into();
        assert!(matches!(err, SessionError::Capture(_)));

        let err: SessionError = InjectionError::Cancelled.into();
        assert!(matches!(err, SessionError::Injection(_)));
    }
}
