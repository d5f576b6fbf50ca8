//! Batched chat notifications.
//!
//! The orchestrator enqueues narration lines as it works; one background task
//! drains the queue on a fixed interval and posts it to the chat channel in
//! as few messages as the payload limit allows. Delivery is best-effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::ChatNotifier;

/// Shortest period the flusher will tick at.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Queue of pending notification lines.
pub struct NotificationBuffer {
    lines: Mutex<Vec<String>>,
    notifier: Option<Arc<dyn ChatNotifier>>,
    max_len: usize,
}

impl NotificationBuffer {
    pub fn new(notifier: Arc<dyn ChatNotifier>, max_len: usize) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            notifier: Some(notifier),
            max_len: max_len.max(1),
        }
    }

    /// A buffer with no chat channel behind it; `enqueue` discards.
    pub fn disabled() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            notifier: None,
            max_len: 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line. Never touches the network.
    pub fn enqueue(&self, line: impl Into<String>) {
        if self.notifier.is_some() {
            self.lock().push(line.into());
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Drain the queue and send it. Returns the number of messages attempted.
    pub async fn flush(&self) -> usize {
        let Some(notifier) = &self.notifier else {
            return 0;
        };

        let drained = std::mem::take(&mut *self.lock());
        if drained.is_empty() {
            return 0;
        }

        let chunks = chunk_text(&drained.join("\n"), self.max_len);
        let count = chunks.len();
        for chunk in chunks {
            if let Err(e) = notifier.send_text(&chunk).await {
                warn!(channel = notifier.name(), error = %e, "Notification send failed, dropping chunk");
            }
        }
        debug!(lines = drained.len(), messages = count, "Notifications flushed");
        count
    }
}

/// Split `text` into pieces of at most `max_chars` characters, in order.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for ch in text.chars() {
        if current_chars == max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push(ch);
        current_chars += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Spawn the background flusher.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop flushing;
/// the caller does the final flush. Periods below [`MIN_FLUSH_INTERVAL`] are raised to it.
pub fn spawn_flusher(
    buffer: Arc<NotificationBuffer>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let interval = interval.max(MIN_FLUSH_INTERVAL);

    let handle = tokio::spawn(async move {
        info!("Notification flusher started, flushing every {interval:?}");

        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Notification flusher shutting down");
                return;
            }

            buffer.flush().await;
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use async_trait::async_trait;

    use crate::error::ChannelError;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatNotifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(ChannelError::SendFailed {
                    name: "recording".into(),
                    reason: "down".into(),
                });
            }
            Ok(())
        }

        async fn send_file(&self, _path: &Path) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_flush_sends_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = NotificationBuffer::new(notifier.clone(), 4096);
        assert_eq!(buffer.flush().await, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lines_are_joined_into_one_message() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = NotificationBuffer::new(notifier.clone(), 4096);
        buffer.enqueue("one");
        buffer.enqueue("two");

        assert_eq!(buffer.flush().await, 1);
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["one\ntwo"]);
        assert_eq!(buffer.pending(), 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_chunked_in_order() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = NotificationBuffer::new(notifier.clone(), 10);
        let lines = ["alpha-line", "beta", "gamma-gamma-gamma", "δέλτα"];
        for line in lines {
            buffer.enqueue(line);
        }

        let sent_count = buffer.flush().await;
        let sent = notifier.sent.lock().unwrap().clone();
        assert!(sent_count > 1);
        assert_eq!(sent.len(), sent_count);
        assert!(sent.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(sent.concat(), lines.join("\n"));
    }

    #[tokio::test]
    async fn send_failures_are_swallowed_and_not_requeued() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let buffer = NotificationBuffer::new(notifier.clone(), 4096);
        buffer.enqueue("lost");

        assert_eq!(buffer.flush().await, 1);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.flush().await, 0);
    }

    #[tokio::test]
    async fn disabled_buffer_discards() {
        let buffer = NotificationBuffer::disabled();
        buffer.enqueue("ignored");
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.flush().await, 0);
    }

    #[tokio::test]
    async fn concurrent_enqueues_are_not_lost() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = Arc::new(NotificationBuffer::new(notifier.clone(), 1_000_000));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    for i in 0..50 {
                        buffer.enqueue(format!("w{w}-{i}"));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        let mut flushed = 0;
        for _ in 0..10 {
            buffer.flush().await;
            tokio::task::yield_now().await;
        }
        for w in writers {
            w.await.unwrap();
        }
        buffer.flush().await;

        for chunk in notifier.sent.lock().unwrap().iter() {
            flushed += chunk.lines().count();
        }
        assert_eq!(flushed, 200);
    }

    #[tokio::test]
    async fn flusher_stops_on_shutdown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = Arc::new(NotificationBuffer::new(notifier.clone(), 4096));
        buffer.enqueue("tick");

        let (handle, shutdown) = spawn_flusher(Arc::clone(&buffer), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();

        assert_eq!(*notifier.sent.lock().unwrap(), vec!["tick"]);
    }

    #[tokio::test]
    async fn zero_interval_flusher_keeps_running() {
        let notifier = Arc::new(RecordingNotifier::default());
        let buffer = Arc::new(NotificationBuffer::new(notifier.clone(), 4096));
        buffer.enqueue("first");

        let (handle, shutdown) = spawn_flusher(Arc::clone(&buffer), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.enqueue("second");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn chunk_text_counts_chars() {
        assert_eq!(chunk_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(chunk_text("ééé", 2), vec!["éé", "é"]);
        assert!(chunk_text("", 4).is_empty());
    }
}
