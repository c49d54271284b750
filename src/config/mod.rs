//! Application configuration from environment variables.
//!
//! Priority: environment variables > `.env` values > defaults. The `.env`
//! file is loaded by the binary before this module reads the environment.
//!
//! # Variables
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `DASHSCOPE_API_KEY` | required | bearer token for the recognizer |
//! | `VOXTYPE_ENDPOINT` | DashScope inference URL | WebSocket endpoint |
//! | `VOXTYPE_MODEL` | `fun-asr-realtime` | recognition model |
//! | `VOXTYPE_SAMPLE_RATE` | `16000` | capture sample rate in Hz |
//! | `VOXTYPE_CONNECT_TIMEOUT_MS` | `10000` | handshake timeout |
//! | `VOXTYPE_TASK_START_TIMEOUT_MS` | `10000` | task-started timeout |
//! | `VOXTYPE_RECONNECT_MAX_ATTEMPTS` | `5` | 0 for unlimited |
//! | `VOXTYPE_RECONNECT_INITIAL_DELAY_MS` | `1000` | backoff start |
//! | `VOXTYPE_MIN_FRAME_BYTES` | `3200` | minimum transport frame |
//! | `VOXTYPE_MAX_BUFFER_BYTES` | `640000` | frame buffer cap |
//! | `VOXTYPE_MAX_RECONNECT_BYTES` | `320000` | reconnection buffer cap |
//! | `VOXTYPE_ERROR_RECOVERY_DELAY_MS` | `2000` | error auto-recovery delay |
//! | `VOXTYPE_SIMILARITY_THRESHOLD` | `0.3` | reconciler ratio gate |
//! | `VOXTYPE_MAX_SHRINK_DELETE` | `50` | reconciler shrink cap |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::asr::RecognizerConfig;
use crate::session::SessionConfig;
use crate::text::ReconcilerParams;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    /// A variable is present but unparseable
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub recognizer: RecognizerConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("DASHSCOPE_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DASHSCOPE_API_KEY"))?;

        let mut recognizer = RecognizerConfig::new(api_key);
        if let Some(endpoint) = env_string("VOXTYPE_ENDPOINT") {
            recognizer.endpoint = endpoint;
        }
        if let Some(model) = env_string("VOXTYPE_MODEL") {
            recognizer.model = model;
        }
        recognizer.sample_rate = env_parsed("VOXTYPE_SAMPLE_RATE", recognizer.sample_rate)?;
        recognizer.connect_timeout =
            env_duration_ms("VOXTYPE_CONNECT_TIMEOUT_MS", recognizer.connect_timeout)?;
        recognizer.task_start_timeout =
            env_duration_ms("VOXTYPE_TASK_START_TIMEOUT_MS", recognizer.task_start_timeout)?;
        recognizer.reconnect.max_attempts = env_parsed(
            "VOXTYPE_RECONNECT_MAX_ATTEMPTS",
            recognizer.reconnect.max_attempts,
        )?;
        recognizer.reconnect.base_delay = env_duration_ms(
            "VOXTYPE_RECONNECT_INITIAL_DELAY_MS",
            recognizer.reconnect.base_delay,
        )?;

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            min_frame_bytes: env_parsed("VOXTYPE_MIN_FRAME_BYTES", defaults.min_frame_bytes)?,
            max_buffer_bytes: env_parsed("VOXTYPE_MAX_BUFFER_BYTES", defaults.max_buffer_bytes)?,
            max_reconnect_bytes: env_parsed(
                "VOXTYPE_MAX_RECONNECT_BYTES",
                defaults.max_reconnect_bytes,
            )?,
            combined_ceiling_bytes: defaults.combined_ceiling_bytes,
            error_recovery_delay: env_duration_ms(
                "VOXTYPE_ERROR_RECOVERY_DELAY_MS",
                defaults.error_recovery_delay,
            )?,
            reconciler: ReconcilerParams {
                similarity_threshold: env_parsed(
                    "VOXTYPE_SIMILARITY_THRESHOLD",
                    defaults.reconciler.similarity_threshold,
                )?,
                max_shrink_delete: env_parsed(
                    "VOXTYPE_MAX_SHRINK_DELETE",
                    defaults.reconciler.max_shrink_delete,
                )?,
            },
        };

        Ok(Self {
            recognizer,
            session,
        })
    }
}

fn env_string(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_string(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn env_duration_ms(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis: u64 = env_parsed(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
