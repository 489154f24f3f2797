//! Application layer: the relay's state machines and dispatch logic.
//!
//! Everything here is transport-agnostic: connections are bounded message
//! queues, capture hardware is reached through the [`CaptureSource`] trait,
//! and the screenshot backend through [`ScreenshotProvider`]. The
//! infrastructure layer plugs the real WebSocket sinks and devices into
//! these seams.
//!
//! [`CaptureSource`]: crate::infrastructure::capture::CaptureSource
//! [`ScreenshotProvider`]: crate::infrastructure::screenshot::ScreenshotProvider

pub mod dispatcher;
pub mod lifecycle;
pub mod registry;

pub use dispatcher::{BroadcastDispatcher, SignalEvent};
pub use lifecycle::{CaptureLifecycleManager, SourceState};
pub use registry::ConnectionRegistry;
