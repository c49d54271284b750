pub mod asr;
pub mod audio;
pub mod config;
pub mod session;
pub mod text;

// Re-export commonly used items for convenience
pub use asr::{AsrError, RecognizerClient, RecognizerConfig, RecognizerEvent, TranscriptSnapshot};
pub use audio::{CaptureSource, FrameBuffer, ReconnectBuffer};
pub use config::AppConfig;
pub use session::{SessionConfig, SessionController, SessionError, SessionPhase};
pub use text::{EditOp, Notifier, SerializedInjector, TextSink, TranscriptReconciler};
