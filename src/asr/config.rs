//! Configuration types for the realtime recognition client.
//!
//! This module contains the connection-level configuration:
//! - WebSocket endpoint and bearer-token credentials
//! - Recognition model selection
//! - Audio format parameters
//! - Timeouts and reconnection policy

use std::time::Duration;

use http::Request;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;

use super::retry::ReconnectPolicy;
use super::AsrError;

/// Default inference endpoint for the recognition service.
pub const DEFAULT_ENDPOINT: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";

/// Default realtime recognition model.
pub const DEFAULT_MODEL: &str = "fun-asr-realtime";

/// Default sample rate required by the realtime models (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Configuration for the realtime recognition client.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// WebSocket endpoint URL (wss://)
    pub endpoint: String,

    /// API key sent as a bearer token on the handshake
    pub api_key: String,

    /// Recognition model name
    pub model: String,

    /// Audio sample rate in Hz. The realtime models accept 16kHz mono
    /// little-endian 16-bit PCM only.
    pub sample_rate: u32,

    /// Timeout for establishing the WebSocket connection.
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Timeout waiting for the `task-started` acknowledgment after
    /// sending `run-task`. Default: 10 seconds
    pub task_start_timeout: Duration,

    /// Automatic reconnection policy for unexpected transport loss.
    pub reconnect: ReconnectPolicy,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            connect_timeout: Duration::from_secs(10),
            task_start_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RecognizerConfig {
    /// Create a configuration with the given API key and defaults elsewhere.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration before connecting.
    pub fn validate(&self) -> Result<(), AsrError> {
        if self.api_key.is_empty() {
            return Err(AsrError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if !self.endpoint.starts_with("wss://") && !self.endpoint.starts_with("ws://") {
            return Err(AsrError::InvalidConfiguration(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.model.is_empty() {
            return Err(AsrError::InvalidConfiguration(
                "model name is required".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(AsrError::InvalidConfiguration(
                "sample rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the WebSocket handshake request with the bearer auth header.
    ///
    /// tokio-tungstenite does not attach custom headers itself, so the
    /// upgrade request is assembled manually with the required
    /// `Sec-WebSocket-*` fields plus `Authorization`.
    pub fn build_handshake_request(&self) -> Result<Request<()>, AsrError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| AsrError::InvalidConfiguration(format!("invalid endpoint URL: {}", e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| {
                AsrError::InvalidConfiguration("endpoint URL has no host".to_string())
            })?
            .to_string();

        Request::builder()
            .method("GET")
            .uri(self.endpoint.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Authorization", format!("bearer {}", self.api_key))
            .body(())
            .map_err(|e| AsrError::ConnectionFailed(format!("failed to build request: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecognizerConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, "fun-asr-realtime");
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.task_start_timeout, Duration::from_secs(10));
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = RecognizerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(AsrError::InvalidConfiguration(_))
        ));

        let config = RecognizerConfig::new("sk-test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = RecognizerConfig {
            endpoint: "https://example.com".to_string(),
            ..RecognizerConfig::new("sk-test")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let config = RecognizerConfig {
            model: String::new(),
            ..RecognizerConfig::new("sk-test")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_handshake_request() {
        let config = RecognizerConfig::new("sk-test");
        let request = config.build_handshake_request().unwrap();

        assert_eq!(request.method(), "GET");
        assert_eq!(request.uri().to_string(), DEFAULT_ENDPOINT);
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "bearer sk-test"
        );
        assert_eq!(
            request.headers().get("Host").unwrap(),
            "dashscope.aliyuncs.com"
        );
        assert_eq!(request.headers().get("Upgrade").unwrap(), "websocket");
        assert!(request.headers().contains_key("Sec-WebSocket-Key"));
    }
}
