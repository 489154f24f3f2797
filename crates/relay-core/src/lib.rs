//! # relay-core
//!
//! Shared library for Signal Relay containing the subscriber wire protocol,
//! audio-frame domain types, and the message token generator.
//!
//! This crate is used by the relay server and by any future native tooling
//! that needs to speak the subscriber protocol. It has zero dependencies on
//! OS APIs, audio backends, or network sockets.
//!
//! # Architecture overview
//!
//! Signal Relay is a local fan-out service: it captures live host signals
//! (microphone audio, system-loopback audio, clipboard text, on-demand
//! screenshots) and pushes them as typed JSON messages to every connected
//! WebSocket subscriber. This crate defines:
//!
//! - **`protocol`** - What travels over the wire. Every outbound message is a
//!   JSON envelope carrying a random correlation token, an event-type tag,
//!   and a payload whose schema is selected by that tag. Inbound subscriber
//!   commands are decoded here as well.
//!
//! - **`domain`** - Pure types with no I/O: the normalized audio frame and
//!   its PCM16 conversion rules, the connection identifier, and the
//!   read-only device-info model exposed to external collaborators.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Envelope` instead of `relay_core::protocol::envelope::Envelope`.
pub use domain::audio::{
    normalize_pcm16_bytes, normalize_pcm16_samples, AudioFrame, AudioSourceKind,
};
pub use domain::device::DeviceInfo;
pub use domain::ConnectionId;
pub use protocol::command::{decode_command, ClientCommand};
pub use protocol::envelope::{event_types, Envelope, EventPayload};
pub use protocol::token::message_token;
