//! The session controller: one authoritative owner for session state.
//!
//! Everything session-scoped is mutated only here. Activation and
//! deactivation are mutually exclusive critical sections behind an async
//! transition lock; a tagged phase plus a monotonically increasing epoch
//! make late events (transcripts after deactivation, delayed error
//! recovery firing after a new activation) cheap to detect and drop.
//!
//! Per activation the controller spawns one session loop that selects
//! over capture chunks and recognizer events. Audio routes capture →
//! frame buffer → transport while a task runs; while the transport is
//! down the same chunks route to the reconnection buffer instead, which
//! replays as a single frame once a fresh task is running. Transcript
//! snapshots route reconciler → injector, one edit in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asr::{AsrError, RecognizerClient, RecognizerConfig, RecognizerEvent};
use crate::audio::{
    CaptureError, CaptureSource, FrameBuffer, MAX_BUFFER_BYTES, MAX_RECONNECT_BYTES,
    MIN_FRAME_BYTES, ReconnectBuffer,
};
use crate::text::{
    InjectionError, Notifier, ReconcilerParams, SerializedInjector, TextSink,
    TranscriptReconciler,
};

use super::{SessionError, SessionPhase};

/// Combined hard ceiling across both audio buffers: about 30 seconds.
/// Crossing it is a safety valve, not a normal code path.
pub const COMBINED_CEILING_BYTES: usize = 960_000;

/// Delay before the error state auto-recovers back to idle.
pub const ERROR_RECOVERY_DELAY: Duration = Duration::from_secs(2);

/// Session-level tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum emitted frame size in bytes
    pub min_frame_bytes: usize,
    /// Frame buffer cap in bytes
    pub max_buffer_bytes: usize,
    /// Reconnection buffer cap in bytes
    pub max_reconnect_bytes: usize,
    /// Hard ceiling across both buffers in bytes
    pub combined_ceiling_bytes: usize,
    /// Delay before error-state auto-recovery
    pub error_recovery_delay: Duration,
    /// Reconciliation thresholds
    pub reconciler: ReconcilerParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_frame_bytes: MIN_FRAME_BYTES,
            max_buffer_bytes: MAX_BUFFER_BYTES,
            max_reconnect_bytes: MAX_RECONNECT_BYTES,
            combined_ceiling_bytes: COMBINED_CEILING_BYTES,
            error_recovery_delay: ERROR_RECOVERY_DELAY,
            reconciler: ReconcilerParams::default(),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    /// Bumped on every activation; tags late events as stale.
    epoch: u64,
}

/// Resources owned by one activation cycle.
struct SessionRuntime {
    client: Arc<tokio::sync::Mutex<RecognizerClient>>,
    cancel: CancellationToken,
    pump: tokio::task::JoinHandle<()>,
}

struct Inner {
    recognizer_config: RecognizerConfig,
    config: SessionConfig,
    capture: tokio::sync::Mutex<Box<dyn CaptureSource>>,
    injector: Arc<SerializedInjector>,
    notifier: Arc<dyn Notifier>,
    state: parking_lot::Mutex<SessionState>,
    /// Makes activate() and deactivate() mutually exclusive.
    transition: tokio::sync::Mutex<()>,
    runtime: tokio::sync::Mutex<Option<SessionRuntime>>,
}

/// Orchestrates one dictation session end to end. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        recognizer_config: RecognizerConfig,
        config: SessionConfig,
        capture: Box<dyn CaptureSource>,
        sink: Arc<dyn TextSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let injector = Arc::new(SerializedInjector::new(sink, notifier.clone()));
        Self {
            inner: Arc::new(Inner {
                recognizer_config,
                config,
                capture: tokio::sync::Mutex::new(capture),
                injector,
                notifier,
                state: parking_lot::Mutex::new(SessionState {
                    phase: SessionPhase::Idle,
                    epoch: 0,
                }),
                transition: tokio::sync::Mutex::new(()),
                runtime: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    /// Start dictating. No-op unless the session is idle.
    ///
    /// Checks the input-target precondition, connects the recognizer,
    /// starts a task, and starts capture. Any failure routes through the
    /// shared error handler so no partial state survives.
    pub async fn activate(&self) -> Result<(), SessionError> {
        let _transition = self.inner.transition.lock().await;

        let epoch = {
            let mut state = self.inner.state.lock();
            if state.phase != SessionPhase::Idle {
                debug!("activate() ignored in phase {}", state.phase);
                return Ok(());
            }
            state.phase = SessionPhase::Activating;
            state.epoch += 1;
            state.epoch
        };

        // A missing input target is a user precondition, not a fault
        if !self.inner.injector.has_active_target() {
            self.inner
                .notifier
                .notify("Click into a text field before dictating")
                .await;
            self.inner.state.lock().phase = SessionPhase::Idle;
            return Ok(());
        }

        match self.start_session(epoch).await {
            Ok(runtime) => {
                *self.inner.runtime.lock().await = Some(runtime);
                self.inner.state.lock().phase = SessionPhase::Active;
                info!("Session active");
                Ok(())
            }
            Err(e) => {
                self.report_error(epoch, &format!("Failed to start dictation: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    /// Stop dictating. No-op unless active or in error.
    ///
    /// Interrupts queued edits, stops capture, lets the session loop
    /// flush residual audio, then asks the recognizer to finish the task
    /// so the remote can flush pending results before the transport drops.
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let _transition = self.inner.transition.lock().await;

        {
            let mut state = self.inner.state.lock();
            match state.phase {
                SessionPhase::Active | SessionPhase::Error => {
                    state.phase = SessionPhase::Deactivating;
                }
                other => {
                    debug!("deactivate() ignored in phase {}", other);
                    return Ok(());
                }
            }
        }

        self.inner.injector.cancel_pending();

        match self.inner.capture.lock().await.stop().await {
            Ok(()) | Err(CaptureError::NotCapturing) => {}
            Err(e) => warn!("Capture stop failed: {}", e),
        }

        if let Some(runtime) = self.inner.runtime.lock().await.take() {
            runtime.cancel.cancel();
            if timeout(Duration::from_secs(5), runtime.pump).await.is_err() {
                warn!("Session loop did not exit in time");
            }
            let mut client = runtime.client.lock().await;

            // Graceful close first: finish-task lets the remote flush, the
            // connection winds down on task-finished
            match client.finish_task().await {
                Ok(()) => {
                    if !client.wait_finished(Duration::from_secs(2)).await {
                        debug!("task-finished did not arrive before close");
                    }
                }
                Err(AsrError::NotConnected) => {}
                Err(e) => debug!("finish-task not sent: {}", e),
            }

            if let Err(e) = client.disconnect().await {
                debug!("Recognizer disconnect error during deactivation: {}", e);
            }
        }

        self.inner.state.lock().phase = SessionPhase::Idle;
        info!("Session idle");
        Ok(())
    }

    async fn start_session(&self, epoch: u64) -> Result<SessionRuntime, SessionError> {
        self.inner.injector.reset();

        let mut client = RecognizerClient::new(self.inner.recognizer_config.clone())?;
        let events = client.take_events().ok_or_else(|| {
            SessionError::Internal("recognizer event channel already taken".to_string())
        })?;
        client.connect().await?;

        let capture_rx = match self.inner.capture.lock().await.start().await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = client.disconnect().await;
                return Err(e.into());
            }
        };

        let client = Arc::new(tokio::sync::Mutex::new(client));
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(session_loop(
            self.clone(),
            epoch,
            capture_rx,
            events,
            client.clone(),
            cancel.clone(),
        ));

        Ok(SessionRuntime {
            client,
            cancel,
            pump,
        })
    }

    /// True while the given epoch is the active session.
    fn is_current(&self, epoch: u64) -> bool {
        let state = self.inner.state.lock();
        state.phase == SessionPhase::Active && state.epoch == epoch
    }

    /// The single error funnel: flag the session, tell the user, schedule
    /// idempotent delayed recovery back to idle.
    async fn report_error(&self, epoch: u64, message: &str) {
        {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch || state.phase == SessionPhase::Idle {
                debug!("Ignoring error from stale session: {}", message);
                return;
            }
            state.phase = SessionPhase::Error;
        }

        error!("{}", message);
        self.inner.notifier.notify(message).await;

        let controller = self.clone();
        let delay = self.inner.config.error_recovery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // The recovery is a no-op if anything changed the state since
            // the error fired
            let still_errored = {
                let state = controller.inner.state.lock();
                state.phase == SessionPhase::Error && state.epoch == epoch
            };
            if !still_errored {
                debug!("Skipping stale error recovery");
                return;
            }

            info!("Recovering from error state");
            if let Err(e) = controller.deactivate().await {
                warn!("Error recovery deactivation failed: {}", e);
            }
        });
    }
}

/// Per-activation event loop: routes audio and recognizer events until
/// cancelled or the session dies.
async fn session_loop(
    controller: SessionController,
    epoch: u64,
    mut capture_rx: mpsc::Receiver<Bytes>,
    mut events: mpsc::Receiver<RecognizerEvent>,
    client: Arc<tokio::sync::Mutex<RecognizerClient>>,
    cancel: CancellationToken,
) {
    let config = controller.inner.config.clone();
    let mut frames = FrameBuffer::new(config.min_frame_bytes, config.max_buffer_bytes);
    let mut reconnect = ReconnectBuffer::new(config.max_reconnect_bytes);
    let mut reconciler = TranscriptReconciler::new(config.reconciler.clone());
    let mut transport_down = false;
    let mut task_running = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Residual flush: whatever is still below the frame
                // threshold goes out before finish-task
                if task_running {
                    if let Some(frame) = frames.flush() {
                        if let Err(e) = client.lock().await.send_audio(frame).await {
                            debug!("Residual audio flush dropped: {}", e);
                        }
                    }
                }
                break;
            }

            chunk = capture_rx.recv() => {
                let Some(chunk) = chunk else {
                    // Capture stopped; same residual flush as the cancel path
                    debug!("Capture stream ended");
                    if task_running {
                        if let Some(frame) = frames.flush() {
                            if let Err(e) = client.lock().await.send_audio(frame).await {
                                debug!("Residual audio flush dropped: {}", e);
                            }
                        }
                    }
                    break;
                };

                if transport_down {
                    reconnect.push(chunk);
                } else {
                    frames.push(chunk);
                    if task_running {
                        while let Some(frame) = frames.take_frame() {
                            // Audio loss is preferred over failing the
                            // capture pipeline
                            if let Err(e) = client.lock().await.send_audio(frame).await {
                                debug!("Audio frame dropped: {}", e);
                                break;
                            }
                        }
                    }
                }

                let held = frames.pending_bytes() + reconnect.pending_bytes();
                if held > config.combined_ceiling_bytes {
                    warn!("Combined audio buffers at {} bytes, force-clearing", held);
                    frames.clear();
                    reconnect.clear();
                    controller
                        .report_error(epoch, "Audio backlog exceeded the safety ceiling")
                        .await;
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Recognizer event channel closed");
                    break;
                };

                match event {
                    RecognizerEvent::TaskStarted => {
                        task_running = true;
                    }

                    RecognizerEvent::Transcript(snapshot) => {
                        if !controller.is_current(epoch) {
                            warn!("Dropping transcript snapshot from a stale session");
                            continue;
                        }

                        let op = reconciler.reconcile(&snapshot.text);
                        match controller
                            .inner
                            .injector
                            .apply(&op, reconciler.committed_text())
                            .await
                        {
                            Ok(()) => {}
                            Err(InjectionError::Cancelled) => {
                                debug!("Edit cancelled during deactivation");
                            }
                            Err(e) => {
                                // Clipboard fallback already ran inside the
                                // injector; dictation continues
                                warn!("Edit injection failed: {}", e);
                            }
                        }

                        if snapshot.is_final {
                            if let Some(duration) = snapshot.duration {
                                debug!("Sentence final, billed {:.2}s", duration);
                            }
                        }
                    }

                    RecognizerEvent::TaskFinished => {
                        task_running = false;
                    }

                    RecognizerEvent::TaskFailed { error_code, error_message } => {
                        task_running = false;
                        controller
                            .report_error(
                                epoch,
                                &format!("Recognition failed [{error_code}]: {error_message}"),
                            )
                            .await;
                        break;
                    }

                    RecognizerEvent::Disconnected { was_task_running } => {
                        transport_down = true;
                        task_running = false;
                        if was_task_running {
                            info!("Transport lost mid-task, buffering audio for resume");
                        }
                    }

                    RecognizerEvent::Reconnected { attempt } => {
                        transport_down = false;
                        task_running = true;
                        if let Some(frame) = reconnect.drain() {
                            if let Err(e) = client.lock().await.send_audio(frame).await {
                                debug!("Replay frame dropped: {}", e);
                            }
                        }
                        info!("Resumed after reconnect attempt {}", attempt);
                    }

                    RecognizerEvent::ReconnectFailed { attempts, error } => {
                        task_running = false;
                        controller
                            .report_error(
                                epoch,
                                &format!(
                                    "Connection lost after {attempts} reconnect attempts: {error}"
                                ),
                            )
                            .await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Session loop exited (epoch {})", epoch);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct ChannelCapture {
        tx: Option<mpsc::Sender<Bytes>>,
    }

    #[async_trait]
    impl CaptureSource for ChannelCapture {
        async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>, CaptureError> {
            let (tx, rx) = mpsc::channel(64);
            self.tx = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<(), CaptureError> {
            if self.tx.take().is_none() {
                return Err(CaptureError::NotCapturing);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullSink {
        target_active: AtomicBool,
    }

    #[async_trait]
    impl crate::text::TextSink for NullSink {
        async fn insert_text(&self, _text: &str) -> Result<(), InjectionError> {
            Ok(())
        }
        async fn delete_backward(&self, _count: usize) -> Result<(), InjectionError> {
            Ok(())
        }
        fn has_active_target(&self) -> bool {
            self.target_active.load(Ordering::Relaxed)
        }
        async fn copy_to_clipboard(&self, _text: &str) -> Result<(), InjectionError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) {
            self.messages.lock().await.push(message.to_string());
        }
    }

    fn controller_with(
        sink: Arc<NullSink>,
        notifier: Arc<RecordingNotifier>,
        recovery_delay: Duration,
    ) -> SessionController {
        let recognizer_config = RecognizerConfig {
            endpoint: "ws://127.0.0.1:1/api-ws/v1/inference".to_string(),
            connect_timeout: Duration::from_millis(300),
            task_start_timeout: Duration::from_millis(300),
            ..RecognizerConfig::new("sk-test")
        };
        SessionController::new(
            recognizer_config,
            SessionConfig {
                error_recovery_delay: recovery_delay,
                ..Default::default()
            },
            Box::new(ChannelCapture { tx: None }),
            sink,
            notifier,
        )
    }

    #[tokio::test]
    async fn test_activate_without_target_stays_idle() {
        let sink = Arc::new(NullSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = controller_with(sink, notifier.clone(), Duration::from_secs(2));

        controller.activate().await.unwrap();

        assert_eq!(controller.phase(), SessionPhase::Idle);
        let messages = notifier.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("text field"));
    }

    #[tokio::test]
    async fn test_activate_failure_routes_to_error_then_recovers() {
        let sink = Arc::new(NullSink::default());
        sink.target_active.store(true, Ordering::Relaxed);
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = controller_with(sink, notifier.clone(), Duration::from_millis(100));

        // Unreachable endpoint: activation fails and the error funnel runs
        assert!(controller.activate().await.is_err());
        assert_eq!(controller.phase(), SessionPhase::Error);
        assert!(!notifier.messages.lock().await.is_empty());

        // Delayed recovery returns the session to idle
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_deactivate_when_idle_is_noop() {
        let sink = Arc::new(NullSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = controller_with(sink, notifier, Duration::from_secs(2));

        controller.deactivate().await.unwrap();
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_racing_activate_and_deactivate_settle_consistently() {
        let sink = Arc::new(NullSink::default());
        sink.target_active.store(true, Ordering::Relaxed);
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = controller_with(sink, notifier, Duration::from_millis(100));

        // activate() blocks mid-flight on the unreachable endpoint while
        // deactivate() races it for the transition lock
        let activating = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.activate().await })
        };
        let deactivating = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.deactivate().await })
        };

        let activate_result = activating.await.unwrap();
        deactivating.await.unwrap().unwrap();

        // Whichever order the lock granted, the activation fails against
        // this endpoint and the phase must be one consistent terminal state
        assert!(activate_result.is_err());
        let phase = controller.phase();
        assert!(
            phase == SessionPhase::Idle || phase == SessionPhase::Error,
            "inconsistent terminal phase {phase}"
        );

        // Delayed recovery settles whatever remains back to idle
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_stale_error_recovery_is_noop_after_manual_deactivate() {
        let sink = Arc::new(NullSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = controller_with(sink.clone(), notifier, Duration::from_millis(100));

        sink.target_active.store(true, Ordering::Relaxed);
        assert!(controller.activate().await.is_err());
        assert_eq!(controller.phase(), SessionPhase::Error);

        // User intervenes before the delayed recovery fires
        controller.deactivate().await.unwrap();
        assert_eq!(controller.phase(), SessionPhase::Idle);

        // The stale recovery must not disturb the idle session
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }
}
