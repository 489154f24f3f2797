//! Polling clipboard watcher.
//!
//! Polls the OS clipboard text on a fixed cadence (500 ms after an initial
//! 1 s delay, both configurable) and emits one clipboard-change event per
//! observed change. Polling is a deliberate design choice: no portable
//! OS-level change notification exists across the supported platforms.
//!
//! The watcher implements [`CaptureSource`], so it runs only while at least
//! one subscriber is connected. Change detection keeps the last-observed
//! text (single writer: the poll task itself); a poll emits an event only
//! when the current text is non-empty and differs from the last value. Read
//! failures are logged and polling continues.
//!
//! Clipboard access goes through the [`ClipboardReader`] trait. The arboard
//! implementation runs on tokio's blocking pool because clipboard reads must
//! happen on a thread that may own platform clipboard state; this is an OS
//! constraint, not a design choice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::capture::{CaptureError, CaptureSource};
use crate::application::dispatcher::SignalEvent;

const CLIPBOARD_SOURCE_NAME: &str = "clipboard";

/// Error type for clipboard reads.
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The platform clipboard could not be opened or read.
    #[error("clipboard access failed: {0}")]
    Access(String),
    /// The blocking read task was cancelled or panicked.
    #[error("clipboard read task failed: {0}")]
    Task(String),
}

/// Trait abstracting the platform clipboard.
///
/// `Ok(None)` means "no text on the clipboard", which is not an error.
#[cfg_attr(test, mockall::automock)]
pub trait ClipboardReader: Send + Sync {
    fn read_text(&self) -> Result<Option<String>, ClipboardError>;
}

/// arboard-backed [`ClipboardReader`].
///
/// A fresh `arboard::Clipboard` is opened per read; the handle is not kept
/// across polls because some platforms tie it to the opening thread.
pub struct ArboardClipboard;

impl ArboardClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArboardClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardReader for ArboardClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Access(e.to_string()))?;
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::Access(e.to_string())),
        }
    }
}

/// Lifecycle-gated clipboard poller.
pub struct ClipboardWatcher {
    events: mpsc::Sender<SignalEvent>,
    reader: Arc<dyn ClipboardReader>,
    initial_delay: Duration,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClipboardWatcher {
    pub fn new(
        events: mpsc::Sender<SignalEvent>,
        reader: Arc<dyn ClipboardReader>,
        initial_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            events,
            reader,
            initial_delay,
            poll_interval,
            task: Mutex::new(None),
        }
    }
}

impl CaptureSource for ClipboardWatcher {
    fn name(&self) -> &'static str {
        CLIPBOARD_SOURCE_NAME
    }

    fn start(&self) -> Result<(), CaptureError> {
        let mut task = self.task.lock().expect("lock poisoned");
        if task.is_some() {
            return Ok(());
        }

        // The watcher is always started from a session task, but surface a
        // missing runtime as a normal start failure rather than a panic.
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| CaptureError::Stream {
            source_name: CLIPBOARD_SOURCE_NAME,
            detail: e.to_string(),
        })?;

        *task = Some(runtime.spawn(poll_loop(
            self.events.clone(),
            Arc::clone(&self.reader),
            self.initial_delay,
            self.poll_interval,
        )));
        Ok(())
    }

    fn stop(&self) {
        let task = self.task.lock().expect("lock poisoned").take();
        if let Some(task) = task {
            task.abort();
            debug!("clipboard polling stopped");
        }
    }
}

/// The poll task: prime, wait the initial delay, then poll forever.
async fn poll_loop(
    events: mpsc::Sender<SignalEvent>,
    reader: Arc<dyn ClipboardReader>,
    initial_delay: Duration,
    poll_interval: Duration,
) {
    // Prime the last-observed text so pre-existing clipboard content does
    // not fire a change event on the first poll.
    let mut last_observed = match read_blocking(Arc::clone(&reader)).await {
        Ok(Some(text)) => text,
        Ok(None) => String::new(),
        Err(e) => {
            warn!("initial clipboard read failed: {e}");
            String::new()
        }
    };

    debug!("clipboard polling started");
    tokio::time::sleep(initial_delay).await;
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        ticker.tick().await;
        match read_blocking(Arc::clone(&reader)).await {
            Ok(Some(text)) if !text.is_empty() && text != last_observed => {
                last_observed = text.clone();
                if events
                    .try_send(SignalEvent::ClipboardChanged(text))
                    .is_err()
                {
                    debug!("dispatcher congested, clipboard event dropped");
                }
            }
            Ok(_) => {}
            Err(e) => {
                // Transient platform errors must not kill the poller.
                warn!("clipboard read failed: {e}");
            }
        }
    }
}

/// Runs one clipboard read on the blocking pool.
async fn read_blocking(
    reader: Arc<dyn ClipboardReader>,
) -> Result<Option<String>, ClipboardError> {
    tokio::task::spawn_blocking(move || reader.read_text())
        .await
        .unwrap_or_else(|e| Err(ClipboardError::Task(e.to_string())))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::timeout;

    /// A reader whose successive polls return scripted results, repeating
    /// the final entry once the script runs out.
    fn scripted_reader(
        script: Vec<Result<Option<String>, ClipboardError>>,
    ) -> Arc<dyn ClipboardReader> {
        let mut mock = MockClipboardReader::new();
        let queue = Mutex::new(VecDeque::from(script));
        mock.expect_read_text().returning(move || {
            let mut queue = queue.lock().expect("lock poisoned");
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                clone_result(queue.front().expect("script must not be empty"))
            }
        });
        Arc::new(mock)
    }

    fn clone_result(
        result: &Result<Option<String>, ClipboardError>,
    ) -> Result<Option<String>, ClipboardError> {
        match result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(ClipboardError::Access(e.to_string())),
        }
    }

    fn fast_watcher(
        events: mpsc::Sender<SignalEvent>,
        reader: Arc<dyn ClipboardReader>,
    ) -> ClipboardWatcher {
        ClipboardWatcher::new(
            events,
            reader,
            Duration::from_millis(5),
            Duration::from_millis(10),
        )
    }

    async fn next_event(
        rx: &mut mpsc::Receiver<SignalEvent>,
    ) -> Option<SignalEvent> {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_repeated_text_fires_exactly_one_event() {
        // Poll sequence "a", "a", "b": only the change to "b" may fire.
        let reader = scripted_reader(vec![
            Ok(Some("a".to_string())), // priming read
            Ok(Some("a".to_string())),
            Ok(Some("a".to_string())),
            Ok(Some("b".to_string())),
        ]);
        let (events, mut rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();

        match next_event(&mut rx).await {
            Some(SignalEvent::ClipboardChanged(text)) => assert_eq!(text, "b"),
            other => panic!("expected one clipboard event, got {other:?}"),
        }

        // "b" keeps repeating; no further event may arrive.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err(), "duplicate event for unchanged text");
        watcher.stop();
    }

    #[tokio::test]
    async fn test_preexisting_text_does_not_fire_on_start() {
        let reader = scripted_reader(vec![Ok(Some("already there".to_string()))]);
        let (events, mut rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        watcher.stop();
    }

    #[tokio::test]
    async fn test_empty_text_never_fires() {
        let reader = scripted_reader(vec![
            Ok(Some("x".to_string())), // priming read
            Ok(Some(String::new())),
            Ok(None),
        ]);
        let (events, mut rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        watcher.stop();
    }

    #[tokio::test]
    async fn test_read_failure_does_not_stop_polling() {
        let reader = scripted_reader(vec![
            Err(ClipboardError::Access("transient".to_string())), // priming read
            Err(ClipboardError::Access("transient".to_string())),
            Ok(Some("recovered".to_string())),
        ]);
        let (events, mut rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();

        match next_event(&mut rx).await {
            Some(SignalEvent::ClipboardChanged(text)) => assert_eq!(text, "recovered"),
            other => panic!("watcher must survive read errors, got {other:?}"),
        }
        watcher.stop();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let reader = scripted_reader(vec![Ok(Some("x".to_string()))]);
        let (events, _rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();
        watcher.start().unwrap();
        watcher.stop();
    }

    #[tokio::test]
    async fn test_stop_halts_event_emission() {
        let reader = scripted_reader(vec![
            Ok(Some("a".to_string())), // priming read
            Ok(Some("b".to_string())),
            Ok(Some("c".to_string())),
            Ok(Some("d".to_string())),
        ]);
        let (events, mut rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.start().unwrap();

        assert!(next_event(&mut rx).await.is_some());
        watcher.stop();

        // Drain anything emitted before the abort landed, then verify
        // silence.
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_a_noop() {
        let reader = scripted_reader(vec![Ok(None)]);
        let (events, _rx) = mpsc::channel(8);
        let watcher = fast_watcher(events, reader);
        watcher.stop();
    }
}
