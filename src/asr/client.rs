//! Realtime recognition WebSocket client.
//!
//! This module contains the `RecognizerClient` that owns the persistent
//! socket to the recognition service and the lifecycle of the task running
//! on it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   send_audio()  │────▶│  audio_tx (mpsc) │────▶│ Connection Task │
//! └─────────────────┘     └──────────────────┘     └────────┬────────┘
//! ┌─────────────────┐     ┌──────────────────┐              │
//! │  finish_task()  │────▶│  ctrl_tx (mpsc)  │──────────────┤
//! └─────────────────┘     └──────────────────┘              │
//!                         ┌──────────────────┐              │
//!                         │  event_tx (mpsc) │◀─────────────┘
//!                         └────────┬─────────┘
//!                                  │
//!                                  ▼
//!                     take_events() consumer
//! ```
//!
//! The connection task runs a `tokio::select!` loop over outgoing audio,
//! control commands, the inbound WebSocket stream, and the shutdown signal.
//! When the transport drops unexpectedly the same task runs the reconnect
//! loop: it reopens the socket, starts a fresh task with a new correlation
//! id, and emits `Disconnected` / `Reconnected` events so the caller can
//! replay buffered audio. A `task-failed` event or an intentional
//! `disconnect()` tears the transport down without reconnecting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::config::RecognizerConfig;
use super::messages::{FinishTaskMessage, RecognizerMessage, RunTaskMessage};
use super::{AsrError, AsrResult, RecognizerEvent, TaskStatus};

// =============================================================================
// Constants
// =============================================================================

/// Capacity of the outgoing audio channel. Bounded for backpressure; at
/// 100ms frames this is about three seconds of queued audio.
const AUDIO_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the event channel toward the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Internal Types
// =============================================================================

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Control commands from the owner to the connection task.
#[derive(Debug)]
enum ClientCommand {
    /// Send `finish-task` and keep reading until `task-finished`
    FinishTask,
}

/// Why the inner socket loop exited.
enum CloseReason {
    /// Intentional disconnect via `disconnect()` or drop
    Shutdown,
    /// Task ended normally via `task-finished`
    Finished,
    /// Task aborted via `task-failed`; transport must be closed, no reconnect
    Failed,
    /// Unexpected transport loss; eligible for reconnection
    Transport(String),
}

// =============================================================================
// RecognizerClient
// =============================================================================

/// WebSocket client for the duplex recognition protocol.
///
/// One client owns one logical recognition session. `connect()` opens the
/// socket and starts the first task; audio then flows through
/// `send_audio()` as binary frames while transcript snapshots and
/// connection-state changes arrive on the event channel obtained from
/// `take_events()`.
///
/// Reconnection is automatic for unexpected transport loss, governed by
/// the configured [`super::ReconnectPolicy`]. The consumer sees a
/// `Disconnected` event (stop sending, start buffering) followed by either
/// `Reconnected` (replay buffered audio) or `ReconnectFailed`.
pub struct RecognizerClient {
    config: RecognizerConfig,

    /// Outgoing audio channel toward the connection task.
    audio_tx: Option<mpsc::Sender<Bytes>>,

    /// Control command channel toward the connection task.
    ctrl_tx: Option<mpsc::Sender<ClientCommand>>,

    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Connection task handle.
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    /// Event channel toward the consumer. The sender outlives individual
    /// connections so reconnects keep feeding the same receiver.
    event_tx: mpsc::Sender<RecognizerEvent>,
    event_rx: Option<mpsc::Receiver<RecognizerEvent>>,

    /// True while a task is acknowledged and accepting audio.
    task_running: Arc<AtomicBool>,

    /// Set before an intentional teardown so transport noise during close
    /// is not reported or retried.
    intentional_disconnect: Arc<AtomicBool>,
}

impl RecognizerClient {
    /// Create a new client. Fails fast on invalid configuration.
    pub fn new(config: RecognizerConfig) -> AsrResult<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            audio_tx: None,
            ctrl_tx: None,
            shutdown_tx: None,
            connection_handle: None,
            event_tx,
            event_rx: Some(event_rx),
            task_running: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Take the event receiver. There is exactly one; returns `None` on
    /// subsequent calls.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RecognizerEvent>> {
        self.event_rx.take()
    }

    /// Check whether a task is currently acknowledged and accepting audio.
    pub fn is_task_running(&self) -> bool {
        self.task_running.load(Ordering::Acquire)
    }

    /// Current task status as seen by the owner.
    pub fn task_status(&self) -> TaskStatus {
        if self.is_task_running() {
            TaskStatus::Running
        } else if self.connection_handle.is_some() {
            TaskStatus::Starting
        } else {
            TaskStatus::Idle
        }
    }

    /// Connect to the recognizer and start a recognition task.
    ///
    /// Resolves once the remote acknowledges the task with `task-started`,
    /// after which `send_audio()` is accepted. The connection task keeps
    /// running in the background until `disconnect()`, `task-finished`,
    /// `task-failed`, or reconnect exhaustion.
    pub async fn connect(&mut self) -> AsrResult<()> {
        if let Some(handle) = &self.connection_handle {
            // Idempotent while the connection task is alive; a dead handle
            // means a previous session was never torn down
            if !handle.is_finished() {
                debug!("connect() on a live connection is a no-op");
                return Ok(());
            }
            return Err(AsrError::ConnectionFailed(
                "Previous connection not torn down; call disconnect() first".to_string(),
            ));
        }

        self.intentional_disconnect.store(false, Ordering::Release);

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::channel::<ClientCommand>(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (connected_tx, connected_rx) = oneshot::channel::<AsrResult<()>>();

        self.audio_tx = Some(audio_tx);
        self.ctrl_tx = Some(ctrl_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let task = ConnectionTask {
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            task_running: self.task_running.clone(),
            intentional_disconnect: self.intentional_disconnect.clone(),
        };

        let handle = tokio::spawn(task.run(audio_rx, ctrl_rx, shutdown_rx, connected_tx));
        self.connection_handle = Some(handle);

        // The connection task bounds its own connect and task-start phases;
        // the extra wait here only guards against the task dying early.
        let ack_timeout = self.config.connect_timeout + self.config.task_start_timeout;
        match timeout(ack_timeout + Duration::from_secs(1), connected_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                self.teardown_channels();
                Err(e)
            }
            Ok(Err(_)) => {
                self.teardown_channels();
                Err(AsrError::ConnectionFailed(
                    "Connection task ended before acknowledgment".to_string(),
                ))
            }
            Err(_) => {
                self.teardown_channels();
                Err(AsrError::Timeout(
                    "Timed out waiting for task acknowledgment".to_string(),
                ))
            }
        }
    }

    /// Send one frame of raw PCM audio (16-bit little-endian mono).
    ///
    /// Only valid while a task is running; callers buffer audio themselves
    /// during task startup and reconnection.
    pub async fn send_audio(&self, frame: Bytes) -> AsrResult<()> {
        if !self.is_task_running() {
            return Err(AsrError::NotConnected);
        }

        let audio_tx = self.audio_tx.as_ref().ok_or(AsrError::NotConnected)?;

        let frame_len = frame.len();
        audio_tx
            .send(frame)
            .await
            .map_err(|_| AsrError::NotConnected)?;

        debug!("Queued {} bytes of audio for recognition", frame_len);
        Ok(())
    }

    /// Request graceful end of the current task.
    ///
    /// Sends `finish-task`; the remote flushes pending results and the
    /// `TaskFinished` event arrives on the event channel when done.
    pub async fn finish_task(&self) -> AsrResult<()> {
        let ctrl_tx = self.ctrl_tx.as_ref().ok_or(AsrError::NotConnected)?;
        ctrl_tx
            .send(ClientCommand::FinishTask)
            .await
            .map_err(|_| AsrError::NotConnected)
    }

    /// Wait for the connection task to wind down after [`finish_task`],
    /// bounded by `wait`. Returns true when it ended in time.
    ///
    /// [`finish_task`]: Self::finish_task
    pub async fn wait_finished(&mut self, wait: Duration) -> bool {
        let Some(handle) = self.connection_handle.as_mut() else {
            return true;
        };
        if timeout(wait, &mut *handle).await.is_err() {
            return false;
        }
        self.connection_handle = None;
        self.audio_tx = None;
        self.ctrl_tx = None;
        self.shutdown_tx = None;
        true
    }

    /// Tear the connection down without waiting for pending results.
    ///
    /// Suppresses reconnection and silences transport noise produced by
    /// the close itself.
    pub async fn disconnect(&mut self) -> AsrResult<()> {
        self.intentional_disconnect.store(true, Ordering::Release);

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }

        self.audio_tx = None;
        self.ctrl_tx = None;
        self.task_running.store(false, Ordering::Release);

        info!("Disconnected from recognizer");
        Ok(())
    }

    fn teardown_channels(&mut self) {
        self.audio_tx = None;
        self.ctrl_tx = None;
        self.shutdown_tx = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        self.task_running.store(false, Ordering::Release);
    }
}

impl Drop for RecognizerClient {
    fn drop(&mut self) {
        self.intentional_disconnect.store(true, Ordering::Release);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// State shared into the spawned connection task.
struct ConnectionTask {
    config: RecognizerConfig,
    event_tx: mpsc::Sender<RecognizerEvent>,
    task_running: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
}

impl ConnectionTask {
    async fn run(
        self,
        mut audio_rx: mpsc::Receiver<Bytes>,
        mut ctrl_rx: mpsc::Receiver<ClientCommand>,
        mut shutdown_rx: oneshot::Receiver<()>,
        connected_tx: oneshot::Sender<AsrResult<()>>,
    ) {
        // First connection: failure is reported to the waiting connect() call
        // rather than the event channel.
        let (mut ws_sink, mut ws_stream, mut task_id) = match self.open_task().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Initial connection failed: {}", e);
                let _ = connected_tx.send(Err(e));
                return;
            }
        };

        self.task_running.store(true, Ordering::Release);
        let _ = connected_tx.send(Ok(()));
        let _ = self.event_tx.try_send(RecognizerEvent::TaskStarted);
        info!(task_id = %task_id, "Recognition task started");

        loop {
            let reason = self
                .socket_loop(
                    &mut ws_sink,
                    &mut ws_stream,
                    &task_id,
                    &mut audio_rx,
                    &mut ctrl_rx,
                    &mut shutdown_rx,
                )
                .await;

            let was_task_running = self.task_running.swap(false, Ordering::AcqRel);

            match reason {
                CloseReason::Shutdown => {
                    // finish-task then close, best effort; the remote may
                    // already be gone
                    let finish = FinishTaskMessage::new(task_id.clone());
                    if let Ok(json) = serde_json::to_string(&finish) {
                        let _ = ws_sink.send(Message::Text(json.into())).await;
                    }
                    let _ = ws_sink.send(Message::Close(None)).await;
                    debug!("Recognizer connection closed on shutdown");
                    return;
                }
                CloseReason::Finished => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    info!("Recognition task finished");
                    return;
                }
                CloseReason::Failed => {
                    // Per protocol the client closes the transport after
                    // task-failed; no automatic reconnect for this closure.
                    let _ = ws_sink.send(Message::Close(None)).await;
                    warn!("Recognition task failed; transport closed");
                    return;
                }
                CloseReason::Transport(err) => {
                    if self.intentional_disconnect.load(Ordering::Acquire) {
                        debug!("Ignoring transport error during teardown: {}", err);
                        return;
                    }

                    warn!("Recognizer transport lost: {}", err);
                    let _ = self
                        .event_tx
                        .try_send(RecognizerEvent::Disconnected { was_task_running });

                    match self.reconnect(&mut shutdown_rx, err).await {
                        Some((sink, stream, id, attempt)) => {
                            ws_sink = sink;
                            ws_stream = stream;
                            task_id = id;
                            self.task_running.store(true, Ordering::Release);
                            let _ = self
                                .event_tx
                                .try_send(RecognizerEvent::Reconnected { attempt });
                            info!(task_id = %task_id, attempt, "Reconnected with fresh task");
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Reconnect loop after unexpected transport loss. Returns the new
    /// connection, or `None` when attempts are exhausted, reconnection is
    /// disabled, or shutdown arrives mid-backoff.
    async fn reconnect(
        &self,
        shutdown_rx: &mut oneshot::Receiver<()>,
        first_error: String,
    ) -> Option<(WsSink, WsStream, String, u32)> {
        let mut backoff = self.config.reconnect.backoff();
        let mut last_error = first_error;

        loop {
            let Some(delay) = backoff.next_delay() else {
                error!(
                    "Reconnection exhausted after {} attempts: {}",
                    backoff.attempt(),
                    last_error
                );
                let _ = self.event_tx.try_send(RecognizerEvent::ReconnectFailed {
                    attempts: backoff.attempt(),
                    error: last_error,
                });
                return None;
            };

            debug!("Reconnect attempt {} in {:?}", backoff.attempt(), delay);
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    debug!("Shutdown during reconnect backoff");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if self.intentional_disconnect.load(Ordering::Acquire) {
                return None;
            }

            match self.open_task().await {
                Ok((sink, stream, task_id)) => {
                    return Some((sink, stream, task_id, backoff.attempt()));
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", backoff.attempt(), e);
                    last_error = e.to_string();
                }
            }
        }
    }

    /// Open the socket and start a fresh recognition task on it.
    ///
    /// Each connection gets its own correlation id; the previous task died
    /// with the previous transport.
    async fn open_task(&self) -> AsrResult<(WsSink, WsStream, String)> {
        let request = self.config.build_handshake_request()?;

        let connect_result = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                AsrError::Timeout(format!(
                    "Connection timed out after {:?}",
                    self.config.connect_timeout
                ))
            })?;

        let (ws_stream, _response) = connect_result.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("401") || msg.contains("Unauthorized") {
                AsrError::AuthenticationFailed(
                    "Recognizer rejected the API key".to_string(),
                )
            } else {
                AsrError::ConnectionFailed(msg)
            }
        })?;

        debug!("WebSocket connected to {}", self.config.endpoint);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let task_id = uuid::Uuid::new_v4().simple().to_string();
        let run_task = RunTaskMessage::new(
            task_id.clone(),
            self.config.model.clone(),
            self.config.sample_rate,
        );
        let json = serde_json::to_string(&run_task)
            .map_err(|e| AsrError::SerializationError(e.to_string()))?;

        ws_sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| AsrError::WebSocketError(format!("Failed to send run-task: {e}")))?;

        // Audio is not accepted until the remote acknowledges the task
        let started = timeout(self.config.task_start_timeout, async {
            while let Some(msg) = ws_stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(AsrError::WebSocketError(format!(
                            "Transport error before task start: {e}"
                        )));
                    }
                };
                match RecognizerMessage::parse(&text) {
                    Ok(RecognizerMessage::TaskStarted { .. }) => return Ok(()),
                    Ok(RecognizerMessage::TaskFailed {
                        error_code,
                        error_message,
                        ..
                    }) => {
                        return Err(AsrError::TaskFailed {
                            code: error_code,
                            message: error_message,
                        });
                    }
                    Ok(other) => {
                        debug!("Ignoring event before task start: {:?}", other);
                    }
                    Err(e) => {
                        warn!("Unparseable message before task start: {}", e);
                    }
                }
            }
            Err(AsrError::ConnectionFailed(
                "Stream ended before task start".to_string(),
            ))
        })
        .await
        .map_err(|_| {
            AsrError::Timeout(format!(
                "No task-started within {:?}",
                self.config.task_start_timeout
            ))
        })?;

        started?;

        Ok((ws_sink, ws_stream, task_id))
    }

    /// The per-connection event loop. Exits with the reason the socket
    /// should be (or already is) closed.
    async fn socket_loop(
        &self,
        ws_sink: &mut WsSink,
        ws_stream: &mut WsStream,
        task_id: &str,
        audio_rx: &mut mpsc::Receiver<Bytes>,
        ctrl_rx: &mut mpsc::Receiver<ClientCommand>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> CloseReason {
        loop {
            tokio::select! {
                // Prioritize audio sending for lowest latency
                biased;

                Some(frame) = audio_rx.recv() => {
                    if let Err(e) = ws_sink.send(Message::Binary(frame)).await {
                        return CloseReason::Transport(format!("Failed to send audio: {e}"));
                    }
                }

                Some(cmd) = ctrl_rx.recv() => {
                    match cmd {
                        ClientCommand::FinishTask => {
                            let finish = FinishTaskMessage::new(task_id.to_string());
                            let json = match serde_json::to_string(&finish) {
                                Ok(json) => json,
                                Err(e) => {
                                    error!("Failed to serialize finish-task: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                return CloseReason::Transport(
                                    format!("Failed to send finish-task: {e}"),
                                );
                            }
                            debug!("Sent finish-task, awaiting task-finished");
                        }
                    }
                }

                message = ws_stream.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            if let Some(reason) = self.handle_message(msg) {
                                return reason;
                            }
                        }
                        Some(Err(e)) => {
                            return CloseReason::Transport(format!("WebSocket error: {e}"));
                        }
                        None => {
                            return CloseReason::Transport("Stream ended".to_string());
                        }
                    }
                }

                _ = &mut *shutdown_rx => {
                    debug!("Shutdown signal received");
                    return CloseReason::Shutdown;
                }
            }
        }
    }

    /// Handle one inbound frame. Returns `Some(reason)` when the loop
    /// should exit.
    fn handle_message(&self, message: Message) -> Option<CloseReason> {
        match message {
            Message::Text(text) => match RecognizerMessage::parse(&text) {
                Ok(RecognizerMessage::ResultGenerated(snapshot)) => {
                    if self
                        .event_tx
                        .try_send(RecognizerEvent::Transcript(snapshot))
                        .is_err()
                    {
                        warn!("Dropping transcript snapshot - event channel full or closed");
                    }
                    None
                }
                Ok(RecognizerMessage::TaskFinished { task_id }) => {
                    debug!(task_id = %task_id, "Received task-finished");
                    let _ = self.event_tx.try_send(RecognizerEvent::TaskFinished);
                    Some(CloseReason::Finished)
                }
                Ok(RecognizerMessage::TaskFailed {
                    task_id,
                    error_code,
                    error_message,
                }) => {
                    error!(
                        task_id = %task_id,
                        "Task failed [{}]: {}", error_code, error_message
                    );
                    let _ = self.event_tx.try_send(RecognizerEvent::TaskFailed {
                        error_code,
                        error_message,
                    });
                    Some(CloseReason::Failed)
                }
                Ok(RecognizerMessage::TaskStarted { task_id }) => {
                    // Already acknowledged during open; harmless duplicate
                    debug!(task_id = %task_id, "Duplicate task-started");
                    None
                }
                Ok(RecognizerMessage::Unknown(event)) => {
                    debug!("Ignoring unknown event '{}'", event);
                    None
                }
                Err(e) => {
                    warn!("Failed to parse recognizer message: {} - raw: {}", e, text);
                    None
                }
            },
            Message::Close(frame) => {
                Some(CloseReason::Transport(format!("Closed by remote: {frame:?}")))
            }
            Message::Ping(_) | Message::Pong(_) => None,
            other => {
                debug!("Ignoring unexpected frame: {:?}", other);
                None
            }
        }
    }
}
