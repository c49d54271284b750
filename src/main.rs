//! Demo binary: dictate raw PCM from stdin to the terminal.
//!
//! Pipe 16kHz mono 16-bit little-endian PCM in (e.g. from `arecord` or
//! `sox`) and recognized text is typed to stdout, with corrections applied
//! as backspace-and-retype edits. Ctrl-C deactivates the session and
//! exits.
//!
//! ```text
//! arecord -f S16_LE -r 16000 -c 1 -t raw | voxtype
//! ```

use std::io::Write as _;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxtype::audio::{CaptureError, CaptureSource, rms_volume};
use voxtype::config::AppConfig;
use voxtype::session::SessionController;
use voxtype::text::{InjectionError, Notifier, TextSink};

/// voxtype - live dictation from stdin PCM to the terminal
#[derive(Parser, Debug)]
#[command(name = "voxtype")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Recognition model (overrides VOXTYPE_MODEL)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// WebSocket endpoint (overrides VOXTYPE_ENDPOINT)
    #[arg(long = "endpoint")]
    endpoint: Option<String>,

    /// Bytes read from stdin per chunk
    #[arg(long = "chunk-bytes", default_value_t = 3200)]
    chunk_bytes: usize,

    /// Print an input level meter to stderr
    #[arg(long = "meter")]
    meter: bool,
}

// =============================================================================
// Collaborator Implementations
// =============================================================================

/// Capture source reading raw PCM from stdin.
struct StdinCapture {
    chunk_bytes: usize,
    meter: bool,
    cancel: Option<CancellationToken>,
}

#[async_trait]
impl CaptureSource for StdinCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>, CaptureError> {
        if self.cancel.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let chunk_bytes = self.chunk_bytes.max(2);
        let meter = self.meter;
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; chunk_bytes];
            loop {
                let read = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = stdin.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => {
                        debug!("stdin reached EOF");
                        break;
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if meter {
                            let level = (rms_volume(&chunk) * 20.0) as usize;
                            eprint!("\r[{:<20}]", "#".repeat(level));
                        }
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        match self.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(CaptureError::NotCapturing),
        }
    }
}

/// Text sink that types into the terminal.
struct TerminalSink;

#[async_trait]
impl TextSink for TerminalSink {
    async fn insert_text(&self, text: &str) -> Result<(), InjectionError> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| InjectionError::SinkFailed(e.to_string()))
    }

    async fn delete_backward(&self, count: usize) -> Result<(), InjectionError> {
        // Backspace, overwrite with space, backspace again
        let mut stdout = std::io::stdout().lock();
        for _ in 0..count {
            stdout
                .write_all(b"\x08 \x08")
                .map_err(|e| InjectionError::SinkFailed(e.to_string()))?;
        }
        stdout
            .flush()
            .map_err(|e| InjectionError::SinkFailed(e.to_string()))
    }

    fn has_active_target(&self) -> bool {
        true
    }

    async fn copy_to_clipboard(&self, text: &str) -> Result<(), InjectionError> {
        eprintln!("\n[clipboard] {text}");
        Ok(())
    }
}

/// Notifier printing to stderr.
struct StderrNotifier;

#[async_trait]
impl Notifier for StderrNotifier {
    async fn notify(&self, message: &str) {
        eprintln!("\n* {message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(model) = cli.model {
        config.recognizer.model = model;
    }
    if let Some(endpoint) = cli.endpoint {
        config.recognizer.endpoint = endpoint;
    }

    let capture = StdinCapture {
        chunk_bytes: cli.chunk_bytes,
        meter: cli.meter,
        cancel: None,
    };

    let controller = SessionController::new(
        config.recognizer,
        config.session,
        Box::new(capture),
        Arc::new(TerminalSink),
        Arc::new(StderrNotifier),
    );

    info!("Starting dictation, Ctrl-C to stop");
    controller.activate().await?;

    tokio::signal::ctrl_c().await?;
    eprintln!();
    info!("Stopping dictation");
    controller.deactivate().await?;

    Ok(())
}
