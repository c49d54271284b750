//! Serialized application of edits to the external text sink.
//!
//! Sink operations are asynchronous; applying two edits concurrently can
//! interleave their delete/insert halves and corrupt the visible text.
//! The injector holds a single in-flight lock per session so edits apply
//! strictly one after another, and a cancellation token so deactivation
//! can discard queued edits cleanly.
//!
//! When the sink rejects an edit, the full current snapshot text goes to
//! the clipboard side channel and the user is told to paste manually.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::reconciler::EditOp;
use super::{InjectionError, Notifier, TextSink};

/// Applies [`EditOp`]s to a [`TextSink`], one at a time.
pub struct SerializedInjector {
    sink: Arc<dyn TextSink>,
    notifier: Arc<dyn Notifier>,
    /// Serializes edits; a second apply() waits here until the first
    /// finishes.
    in_flight: tokio::sync::Mutex<()>,
    /// Cancels edits queued behind the lock on deactivation.
    cancel: parking_lot::Mutex<CancellationToken>,
}

impl SerializedInjector {
    pub fn new(sink: Arc<dyn TextSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            sink,
            notifier,
            in_flight: tokio::sync::Mutex::new(()),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    /// Whether the sink currently has a focused input target.
    pub fn has_active_target(&self) -> bool {
        self.sink.has_active_target()
    }

    /// Apply one edit. Waits for any in-flight edit to finish first.
    ///
    /// `full_text` is the complete current snapshot, used for the
    /// clipboard fallback when injection fails.
    pub async fn apply(&self, op: &EditOp, full_text: &str) -> Result<(), InjectionError> {
        if op.is_noop() {
            return Ok(());
        }

        let token = self.cancel.lock().clone();
        let _guard = tokio::select! {
            guard = self.in_flight.lock() => guard,
            _ = token.cancelled() => return Err(InjectionError::Cancelled),
        };
        if token.is_cancelled() {
            return Err(InjectionError::Cancelled);
        }

        debug!(
            "Applying edit: delete {} chars, insert {} chars",
            op.delete_count,
            op.insert_text.chars().count()
        );

        let result = tokio::select! {
            result = self.inject(op) => result,
            _ = token.cancelled() => Err(InjectionError::Cancelled),
        };

        match result {
            Ok(()) => Ok(()),
            Err(InjectionError::Cancelled) => Err(InjectionError::Cancelled),
            Err(e) => {
                warn!("Injection failed, falling back to clipboard: {}", e);
                self.clipboard_fallback(full_text).await;
                Err(e)
            }
        }
    }

    async fn inject(&self, op: &EditOp) -> Result<(), InjectionError> {
        if op.delete_count > 0 {
            self.sink.delete_backward(op.delete_count).await?;
        }
        if !op.insert_text.is_empty() {
            self.sink.insert_text(&op.insert_text).await?;
        }
        Ok(())
    }

    async fn clipboard_fallback(&self, full_text: &str) {
        match self.sink.copy_to_clipboard(full_text).await {
            Ok(()) => {
                self.notifier
                    .notify("Typing failed - transcript copied to clipboard, paste manually")
                    .await;
            }
            Err(e) => {
                warn!("Clipboard fallback also failed: {}", e);
                self.notifier.notify("Typing failed").await;
            }
        }
    }

    /// Interrupt the in-flight edit and discard edits queued behind it.
    pub fn cancel_pending(&self) {
        self.cancel.lock().cancel();
    }

    /// Arm a fresh cancellation token for the next activation.
    pub fn reset(&self) {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        ops: Mutex<Vec<String>>,
        fail_inserts: AtomicBool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TextSink for RecordingSink {
        async fn insert_text(&self, text: &str) -> Result<(), InjectionError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_inserts.load(Ordering::Relaxed) {
                return Err(InjectionError::SinkFailed("simulated".to_string()));
            }
            self.ops.lock().await.push(format!("insert:{}", text));
            Ok(())
        }

        async fn delete_backward(&self, count: usize) -> Result<(), InjectionError> {
            self.ops.lock().await.push(format!("delete:{}", count));
            Ok(())
        }

        fn has_active_target(&self) -> bool {
            true
        }

        async fn copy_to_clipboard(&self, text: &str) -> Result<(), InjectionError> {
            self.ops.lock().await.push(format!("clipboard:{}", text));
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

    fn edit(delete: usize, insert: &str) -> EditOp {
        EditOp {
            delete_count: delete,
            insert_text: insert.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delete_precedes_insert() {
        let sink = Arc::new(RecordingSink::default());
        let injector =
            SerializedInjector::new(sink.clone(), Arc::new(RecordingNotifier::default()));

        injector.apply(&edit(3, "abc"), "abc").await.unwrap();

        let ops = sink.ops.lock().await;
        assert_eq!(*ops, vec!["delete:3".to_string(), "insert:abc".to_string()]);
    }

    #[tokio::test]
    async fn test_noop_touches_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let injector =
            SerializedInjector::new(sink.clone(), Arc::new(RecordingNotifier::default()));

        injector.apply(&edit(0, ""), "").await.unwrap();
        assert!(sink.ops.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_edits_are_serialized() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let injector = Arc::new(SerializedInjector::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
        ));

        let a = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.apply(&edit(0, "first"), "first").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.apply(&edit(0, "second"), "second").await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let ops = sink.ops.lock().await;
        assert_eq!(
            *ops,
            vec!["insert:first".to_string(), "insert:second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_edits() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let injector = Arc::new(SerializedInjector::new(
            sink.clone(),
            Arc::new(RecordingNotifier::default()),
        ));

        let first = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.apply(&edit(0, "slow"), "slow").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        injector.cancel_pending();

        assert!(matches!(
            first.await.unwrap(),
            Err(InjectionError::Cancelled)
        ));

        // New edits stay cancelled until reset
        assert!(matches!(
            injector.apply(&edit(0, "late"), "late").await,
            Err(InjectionError::Cancelled)
        ));

        injector.reset();
        injector.apply(&edit(0, "fresh"), "fresh").await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_clipboard() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_inserts.store(true, Ordering::Relaxed);
        let notifier = Arc::new(RecordingNotifier::default());
        let injector = SerializedInjector::new(sink.clone(), notifier.clone());

        let result = injector.apply(&edit(0, "hello"), "hello world").await;
        assert!(matches!(result, Err(InjectionError::SinkFailed(_))));

        let ops = sink.ops.lock().await;
        assert!(ops.contains(&"clipboard:hello world".to_string()));
        assert_eq!(notifier.messages.lock().await.len(), 1);
    }
}
