//! WebSocket message types for the duplex recognition protocol.
//!
//! This module contains all message types exchanged with the remote
//! recognizer over the persistent socket:
//!
//! - **Outgoing control messages** (JSON text frames):
//!   - [`RunTaskMessage`]: opens one recognition task on the transport
//!   - [`FinishTaskMessage`]: requests graceful end of the current task
//! - **Outgoing audio**: raw little-endian 16-bit PCM sent as opaque
//!   binary frames (no JSON wrapper), once a task is running
//! - **Incoming events** (JSON text frames keyed by `header.event`):
//!   - `task-started`: the remote accepted the task
//!   - `result-generated`: a transcript snapshot for the in-progress
//!     utterance (each snapshot supersedes the previous one)
//!   - `task-finished`: the task ended normally
//!   - `task-failed`: the task was rejected or aborted

use serde::{Deserialize, Serialize};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Header shared by all outgoing control messages.
#[derive(Debug, Clone, Serialize)]
pub struct ControlHeader {
    /// Control action ("run-task" or "finish-task")
    pub action: &'static str,
    /// Opaque 32-character correlation id for this task
    pub task_id: String,
    /// Streaming mode (always "duplex" - audio up, events down, concurrently)
    pub streaming: &'static str,
}

/// Empty JSON object placeholder required by the protocol envelope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyInput {}

/// Recognition parameters sent with `run-task`.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionParameters {
    /// Audio container format (always raw "pcm")
    pub format: &'static str,
    /// Sample rate in Hz (16000 for this protocol)
    pub sample_rate: u32,
}

/// Payload of the `run-task` control message.
#[derive(Debug, Clone, Serialize)]
pub struct RunTaskPayload {
    pub task_group: &'static str,
    pub task: &'static str,
    pub function: &'static str,
    /// Recognition model name (e.g. a realtime ASR model id)
    pub model: String,
    pub parameters: RecognitionParameters,
    pub input: EmptyInput,
}

/// Control message that opens one recognition task.
///
/// The remote answers with a `task-started` event (or `task-failed`),
/// after which binary audio frames are accepted.
#[derive(Debug, Clone, Serialize)]
pub struct RunTaskMessage {
    pub header: ControlHeader,
    pub payload: RunTaskPayload,
}

impl RunTaskMessage {
    /// Build a `run-task` message for the given correlation id and model.
    pub fn new(task_id: impl Into<String>, model: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            header: ControlHeader {
                action: "run-task",
                task_id: task_id.into(),
                streaming: "duplex",
            },
            payload: RunTaskPayload {
                task_group: "audio",
                task: "asr",
                function: "recognition",
                model: model.into(),
                parameters: RecognitionParameters {
                    format: "pcm",
                    sample_rate,
                },
                input: EmptyInput {},
            },
        }
    }
}

/// Payload of the `finish-task` control message.
#[derive(Debug, Clone, Serialize)]
pub struct FinishTaskPayload {
    pub input: EmptyInput,
}

/// Control message requesting graceful end of the current task.
///
/// The remote flushes any pending results and answers with
/// `task-finished`; completion is observed asynchronously.
#[derive(Debug, Clone, Serialize)]
pub struct FinishTaskMessage {
    pub header: ControlHeader,
    pub payload: FinishTaskPayload,
}

impl FinishTaskMessage {
    /// Build a `finish-task` message for the given correlation id.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            header: ControlHeader {
                action: "finish-task",
                task_id: task_id.into(),
                streaming: "duplex",
            },
            payload: FinishTaskPayload {
                input: EmptyInput {},
            },
        }
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// Word-level timing information inside a transcript snapshot.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct WordTiming {
    /// The transcribed word text
    pub text: String,
    /// Start offset in milliseconds from the beginning of the utterance
    pub begin_time: u64,
    /// End offset in milliseconds
    pub end_time: u64,
    /// Trailing punctuation attached to this word, if any
    #[serde(default)]
    pub punctuation: String,
}

/// One transcript snapshot for the in-progress utterance.
///
/// Snapshots are cumulative, not incremental: each one carries the
/// recognizer's current best guess for the whole utterance and
/// supersedes the previous snapshot. Only when `is_final` is true is
/// the text stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptSnapshot {
    /// Current best-guess text for the utterance
    pub text: String,
    /// Whether this is the final snapshot for the utterance
    pub is_final: bool,
    /// Utterance start offset in milliseconds
    pub begin_time: u64,
    /// Utterance end offset in milliseconds (None on interim snapshots)
    pub end_time: Option<u64>,
    /// Word-level timings, when the model provides them
    pub words: Vec<WordTiming>,
    /// Billed audio duration in seconds (final snapshots only)
    pub duration: Option<f64>,
}

/// Common header on incoming events.
#[derive(Debug, Clone, Deserialize)]
struct EventHeader {
    #[serde(default)]
    task_id: String,
    event: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentencePayload {
    #[serde(default)]
    begin_time: u64,
    #[serde(default)]
    end_time: Option<u64>,
    text: String,
    #[serde(default)]
    sentence_end: bool,
    #[serde(default)]
    words: Vec<WordTiming>,
}

#[derive(Debug, Deserialize)]
struct OutputPayload {
    sentence: SentencePayload,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct ResultGeneratedBody {
    output: OutputPayload,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct ResultGeneratedEvent {
    payload: ResultGeneratedBody,
}

/// Enum for all incoming events from the recognizer.
///
/// Use [`RecognizerMessage::parse`] to deserialize an incoming text frame.
#[derive(Debug, Clone)]
pub enum RecognizerMessage {
    /// The remote accepted the task; binary audio is now accepted
    TaskStarted { task_id: String },
    /// A transcript snapshot for the in-progress utterance
    ResultGenerated(TranscriptSnapshot),
    /// The task ended normally
    TaskFinished { task_id: String },
    /// The task was rejected or aborted; the task channel must be torn down
    TaskFailed {
        task_id: String,
        error_code: String,
        error_message: String,
    },
    /// Unknown event type (for forward compatibility)
    Unknown(String),
}

impl RecognizerMessage {
    /// Parse a WebSocket text frame into the appropriate event type.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        // Peek at the event discriminant first
        #[derive(Deserialize)]
        struct HeaderPeek {
            header: EventHeader,
        }

        let peek: HeaderPeek = serde_json::from_str(text)?;
        let header = peek.header;

        match header.event.as_str() {
            "task-started" => Ok(RecognizerMessage::TaskStarted {
                task_id: header.task_id,
            }),
            "result-generated" => {
                let event: ResultGeneratedEvent = serde_json::from_str(text)?;
                let sentence = event.payload.output.sentence;
                let is_final = sentence.sentence_end;
                Ok(RecognizerMessage::ResultGenerated(TranscriptSnapshot {
                    text: sentence.text,
                    is_final,
                    begin_time: sentence.begin_time,
                    end_time: sentence.end_time,
                    words: sentence.words,
                    // Billed duration is only meaningful on final snapshots
                    duration: if is_final {
                        event.payload.usage.map(|u| u.duration)
                    } else {
                        None
                    },
                }))
            }
            "task-finished" => Ok(RecognizerMessage::TaskFinished {
                task_id: header.task_id,
            }),
            "task-failed" => Ok(RecognizerMessage::TaskFailed {
                task_id: header.task_id,
                error_code: header.error_code.unwrap_or_default(),
                error_message: header.error_message.unwrap_or_default(),
            }),
            _ => Ok(RecognizerMessage::Unknown(header.event)),
        }
    }

    /// Check if this event terminates the task (finished or failed).
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecognizerMessage::TaskFinished { .. } | RecognizerMessage::TaskFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_task_serialization() {
        let msg = RunTaskMessage::new("abc123", "asr-realtime", 16000);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["header"]["action"], "run-task");
        assert_eq!(json["header"]["task_id"], "abc123");
        assert_eq!(json["header"]["streaming"], "duplex");
        assert_eq!(json["payload"]["task_group"], "audio");
        assert_eq!(json["payload"]["task"], "asr");
        assert_eq!(json["payload"]["function"], "recognition");
        assert_eq!(json["payload"]["model"], "asr-realtime");
        assert_eq!(json["payload"]["parameters"]["format"], "pcm");
        assert_eq!(json["payload"]["parameters"]["sample_rate"], 16000);
        assert!(json["payload"]["input"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_finish_task_serialization() {
        let msg = FinishTaskMessage::new("abc123");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["header"]["action"], "finish-task");
        assert_eq!(json["header"]["task_id"], "abc123");
        assert_eq!(json["header"]["streaming"], "duplex");
        assert!(json["payload"]["input"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_parse_task_started() {
        let json = r#"{"header":{"task_id":"t1","event":"task-started","attributes":{}},"payload":{}}"#;
        let msg = RecognizerMessage::parse(json).unwrap();

        match msg {
            RecognizerMessage::TaskStarted { task_id } => assert_eq!(task_id, "t1"),
            _ => panic!("Expected TaskStarted"),
        }
    }

    #[test]
    fn test_parse_result_generated_interim() {
        let json = r#"{
            "header": {"task_id": "t1", "event": "result-generated", "attributes": {}},
            "payload": {
                "output": {
                    "sentence": {
                        "begin_time": 100,
                        "end_time": null,
                        "text": "hello wor",
                        "sentence_end": false,
                        "words": [
                            {"begin_time": 100, "end_time": 400, "text": "hello", "punctuation": ""}
                        ]
                    }
                },
                "usage": null
            }
        }"#;

        let msg = RecognizerMessage::parse(json).unwrap();
        match msg {
            RecognizerMessage::ResultGenerated(snap) => {
                assert_eq!(snap.text, "hello wor");
                assert!(!snap.is_final);
                assert_eq!(snap.begin_time, 100);
                assert_eq!(snap.end_time, None);
                assert_eq!(snap.words.len(), 1);
                assert_eq!(snap.words[0].text, "hello");
                assert_eq!(snap.duration, None);
            }
            _ => panic!("Expected ResultGenerated"),
        }
    }

    #[test]
    fn test_parse_result_generated_final_with_usage() {
        let json = r#"{
            "header": {"task_id": "t1", "event": "result-generated", "attributes": {}},
            "payload": {
                "output": {
                    "sentence": {
                        "begin_time": 100,
                        "end_time": 2300,
                        "text": "hello world",
                        "sentence_end": true,
                        "words": []
                    }
                },
                "usage": {"duration": 2.2}
            }
        }"#;

        let msg = RecognizerMessage::parse(json).unwrap();
        match msg {
            RecognizerMessage::ResultGenerated(snap) => {
                assert!(snap.is_final);
                assert_eq!(snap.end_time, Some(2300));
                assert_eq!(snap.duration, Some(2.2));
            }
            _ => panic!("Expected ResultGenerated"),
        }
    }

    #[test]
    fn test_parse_task_failed() {
        let json = r#"{
            "header": {
                "task_id": "t1",
                "event": "task-failed",
                "error_code": "InvalidParameter",
                "error_message": "bad sample rate",
                "attributes": {}
            },
            "payload": {}
        }"#;

        let msg = RecognizerMessage::parse(json).unwrap();
        match msg {
            RecognizerMessage::TaskFailed {
                error_code,
                error_message,
                ..
            } => {
                assert_eq!(error_code, "InvalidParameter");
                assert_eq!(error_message, "bad sample rate");
            }
            _ => panic!("Expected TaskFailed"),
        }
        let msg = RecognizerMessage::parse(json).unwrap();
        assert!(msg.is_terminal());
    }

    #[test]
    fn test_parse_unknown_event() {
        let json = r#"{"header":{"task_id":"t1","event":"future-event"},"payload":{}}"#;
        let msg = RecognizerMessage::parse(json).unwrap();
        assert!(matches!(msg, RecognizerMessage::Unknown(_)));
        assert!(!msg.is_terminal());
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(RecognizerMessage::parse("not json").is_err());
        assert!(RecognizerMessage::parse(r#"{"payload":{}}"#).is_err());
    }
}
