//! Capture source infrastructure.
//!
//! A capture source is anything that produces a continuous stream of
//! [`SignalEvent`]s while subscribers are connected: the two cpal audio
//! inputs and the clipboard watcher. The lifecycle manager drives sources
//! exclusively through the [`CaptureSource`] trait, which keeps the
//! application layer free of cpal/arboard types and lets tests substitute
//! [`mock::MockCaptureSource`].
//!
//! # Threading
//!
//! cpal streams are not `Send`, so each audio source runs its stream on a
//! dedicated OS thread and hands frames to the async world through the
//! shared capture-event channel. `start()` performs the device open
//! synchronously (so "no device" surfaces as a start failure, not a silent
//! dead stream) and `stop()` joins the worker thread.
//!
//! [`SignalEvent`]: crate::application::dispatcher::SignalEvent

use thiserror::Error;

pub mod cpal_source;
pub mod mock;

pub use cpal_source::{MicrophoneSource, SystemAudioSource};

/// Error type for capture source start failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The backing device does not exist or refused to open.
    #[error("no capture device available for '{source_name}': {detail}")]
    DeviceUnavailable {
        source_name: &'static str,
        detail: String,
    },
    /// The device exists but the stream could not be built or started.
    #[error("audio stream error for '{source_name}': {detail}")]
    Stream {
        source_name: &'static str,
        detail: String,
    },
}

/// Trait abstracting a refcount-gated capture source.
///
/// Both methods are idempotent: starting an already-running source and
/// stopping an already-stopped source are no-ops. Implementations must be
/// callable from any thread.
pub trait CaptureSource: Send + Sync {
    /// Short stable name used in logs and state snapshots.
    fn name(&self) -> &'static str;

    /// Opens the underlying device and begins emitting events.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] when the device is unavailable; the caller
    /// logs it and leaves the source idle.
    fn start(&self) -> Result<(), CaptureError>;

    /// Stops emitting events and releases the underlying device.
    fn stop(&self);
}
