//! Domain layer: pure business-logic types (no I/O, no async, no OS APIs).

pub mod audio;
pub mod device;

/// Unique identifier for one subscriber connection.
///
/// Generated at transport-accept time and never reused: once a connection is
/// removed from the registry its identifier is discarded for good.
pub type ConnectionId = uuid::Uuid;
