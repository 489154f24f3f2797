//! Inbound subscriber command decoding.
//!
//! Subscribers send JSON objects shaped like the outbound envelope; only the
//! `wsEventType` field is inspected. Two failure modes are distinguished so
//! the caller can log them differently, but neither ever closes the
//! connection:
//!
//! - malformed JSON -> `Err(...)`
//! - well-formed JSON with an unknown event type -> `Ok(None)`

use serde::Deserialize;

use crate::protocol::envelope::event_types;

/// A decoded subscriber command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Capture the primary display now and broadcast the result to every
    /// subscriber (not just the requester).
    Screenshot,
}

/// The subset of the inbound message the relay cares about.
///
/// All fields other than `wsEventType` are ignored; `default` keeps decoding
/// tolerant of envelopes that omit the field entirely.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "wsEventType", default)]
    ws_event_type: String,
}

/// Decodes one raw text frame from a subscriber.
///
/// # Errors
///
/// Returns the underlying `serde_json` error when `raw` is not valid JSON.
pub fn decode_command(raw: &str) -> Result<Option<ClientCommand>, serde_json::Error> {
    let message: InboundMessage = serde_json::from_str(raw)?;
    Ok(match message.ws_event_type.as_str() {
        event_types::CLIENT_SCREENSHOT_COMMAND => Some(ClientCommand::Screenshot),
        _ => None,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
