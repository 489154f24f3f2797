//! BroadcastDispatcher: maps capture events and subscriber commands to
//! wire envelopes and pushes them through the registry.
//!
//! # Event flow
//!
//! Capture sources and the external hotkey collaborator feed
//! [`SignalEvent`]s into a bounded mpsc channel; [`BroadcastDispatcher::run`]
//! consumes the channel and broadcasts one envelope per event. The channel
//! decouples hardware-thread timing from network fan-out: a callback thread
//! only performs a non-blocking `try_send` and is never stalled by slow
//! subscribers.
//!
//! Inbound subscriber text flows the other way: the session read loop hands
//! each text frame to [`handle_subscriber_text`]; a decoded screenshot
//! command captures the display on the blocking pool and re-broadcasts the
//! result to *all* subscribers, not just the requester. Unrecognized or
//! malformed input is logged and dropped; it never closes the connection.
//!
//! [`handle_subscriber_text`]: BroadcastDispatcher::handle_subscriber_text

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use relay_core::{decode_command, AudioFrame, ClientCommand, Envelope};

use crate::application::registry::ConnectionRegistry;
use crate::infrastructure::screenshot::ScreenshotProvider;

/// A domain event awaiting broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// One normalized audio callback batch.
    Audio(AudioFrame),
    /// The host clipboard text changed.
    ClipboardChanged(String),
    /// The external hotkey collaborator fired the keyboard trigger.
    KeyboardTrigger,
}

/// Builds envelopes from events and commands and fans them out.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    screenshots: Arc<dyn ScreenshotProvider>,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        screenshots: Arc<dyn ScreenshotProvider>,
    ) -> Self {
        Self {
            registry,
            screenshots,
        }
    }

    /// Consumes the capture-event channel until every sender is dropped.
    ///
    /// Runs as a dedicated tokio task for the life of the process.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SignalEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        debug!("signal channel closed, dispatcher stopping");
    }

    /// Wraps one event in its envelope and broadcasts it.
    fn dispatch(&self, event: SignalEvent) {
        let envelope = match event {
            SignalEvent::Audio(frame) => Envelope::audio(frame),
            SignalEvent::ClipboardChanged(text) => Envelope::clipboard_text(text),
            SignalEvent::KeyboardTrigger => Envelope::keydown(),
        };
        let delivered = self.registry.broadcast(&envelope);
        trace!(
            "broadcast {} to {delivered} subscriber(s)",
            envelope.ws_event_type
        );
    }

    /// Routes one raw text frame received from a subscriber.
    ///
    /// Decode failures are logged and swallowed so a misbehaving subscriber
    /// can never take its own (or anyone else's) connection down.
    pub async fn handle_subscriber_text(&self, raw: &str) {
        match decode_command(raw) {
            Ok(Some(ClientCommand::Screenshot)) => {
                debug!("screenshot command received");
                self.capture_and_broadcast_screenshot().await;
            }
            Ok(None) => {
                warn!("unrecognized subscriber command (ignored)");
            }
            Err(e) => {
                warn!("malformed subscriber message (ignored): {e}");
            }
        }
    }

    /// Captures the primary display and broadcasts the encoded result.
    ///
    /// Also the entry point for the external hotkey collaborator. An empty
    /// capture result means "no screenshot available" and is skipped, per
    /// the provider contract.
    ///
    /// Returns the number of subscribers the screenshot was delivered to.
    pub async fn capture_and_broadcast_screenshot(&self) -> usize {
        let provider = Arc::clone(&self.screenshots);
        // Display capture and JPEG encoding are CPU-bound and synchronous;
        // keep them off the async workers.
        let image = tokio::task::spawn_blocking(move || provider.capture())
            .await
            .unwrap_or_default();

        if image.is_empty() {
            info!("screenshot unavailable, skipping broadcast");
            return 0;
        }
        self.registry.broadcast(&Envelope::screenshot(image))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
