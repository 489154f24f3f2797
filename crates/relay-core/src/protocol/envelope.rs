//! JSON message envelopes pushed to subscribers.
//!
//! Every outbound message shares the same wrapper:
//!
//! ```json
//! {"id":"<21-char token>","payload":{...},"type":"<string|null>","wsEventType":"<string>"}
//! ```
//!
//! - `id` is a random correlation token; subscribers never interpret it.
//! - `wsEventType` selects the payload schema.
//! - `type` mirrors `wsEventType` for some event kinds and is `null` for the
//!   rest; the distinction is part of the frozen wire contract, so the
//!   constructors below are the only way to build an envelope.
//!
//! Envelopes are immutable once constructed: one envelope is serialized once
//! and delivered to every connected subscriber without mutation.
//!
//! # Why one struct and a payload enum instead of a tagged message enum?
//!
//! The payload schema is selected by the `wsEventType` *string* field, not by
//! a serde tag inside the payload object. Constructors pair each event-type
//! tag with its payload variant so an inconsistent combination cannot be
//! built, which gives the same compile-time guarantee a tagged enum would.

use serde::Serialize;

use crate::domain::audio::{AudioFrame, AudioSourceKind};
use crate::protocol::token::message_token;

/// Wire values of the `wsEventType` field.
pub mod event_types {
    /// Periodic normalized audio frame from one capture source.
    pub const AUDIO_DATA: &str = "audio-data-event";
    /// Host clipboard text changed.
    pub const CLIPBOARD_TEXT: &str = "clipboard-text-event";
    /// On-demand screenshot result (base64 data URI).
    pub const CLIPBOARD_IMAGE: &str = "clipboard-image-event";
    /// Host-level keyboard trigger fired.
    pub const KEYDOWN: &str = "keydown-event";
    /// Inbound subscriber command requesting a screenshot broadcast.
    pub const CLIENT_SCREENSHOT_COMMAND: &str = "client-screenshot-command";
}

/// Payload of an audio-data event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDataPayload {
    /// Source tag: `"mic"` or `"system"`.
    #[serde(rename = "audioType")]
    pub audio_type: AudioSourceKind,
    /// Normalized samples in [-1.0, 1.0].
    pub data: Vec<f32>,
}

/// Payload of a clipboard-text event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipboardTextPayload {
    /// The new clipboard text (UTF-8).
    pub text: String,
}

/// Payload of a screenshot (clipboard-image) event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotPayload {
    /// Encoded image as a `data:image/jpeg;base64,...` URI.
    pub base64: String,
}

/// Payload of a keyboard-trigger event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyboardEventPayload {
    /// Trigger kind; the only value currently emitted is `"primary"`.
    #[serde(rename = "keyEventType")]
    pub key_event_type: String,
}

/// The payload variants an envelope can carry.
///
/// Serialized untagged: the object shape alone goes on the wire, and the
/// envelope's `wsEventType` tells the subscriber how to read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Audio frame samples.
    Audio(AudioDataPayload),
    /// Clipboard text change.
    ClipboardText(ClipboardTextPayload),
    /// Screenshot result.
    Image(ScreenshotPayload),
    /// Keyboard trigger.
    Keyboard(KeyboardEventPayload),
}

/// One immutable wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Random 21-character correlation token.
    pub id: String,
    /// Event payload; schema selected by `ws_event_type`.
    pub payload: EventPayload,
    /// Legacy event tag; `null` for audio and screenshot events.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Event-type tag selecting the payload schema.
    #[serde(rename = "wsEventType")]
    pub ws_event_type: String,
}

impl Envelope {
    /// Wraps an audio frame: `wsEventType = "audio-data-event"`, `type = null`.
    pub fn audio(frame: AudioFrame) -> Self {
        Self {
            id: message_token(),
            payload: EventPayload::Audio(AudioDataPayload {
                audio_type: frame.source,
                data: frame.samples,
            }),
            event_type: None,
            ws_event_type: event_types::AUDIO_DATA.to_string(),
        }
    }

    /// Wraps a clipboard change: both tags are `"clipboard-text-event"`.
    pub fn clipboard_text(text: impl Into<String>) -> Self {
        Self {
            id: message_token(),
            payload: EventPayload::ClipboardText(ClipboardTextPayload { text: text.into() }),
            event_type: Some(event_types::CLIPBOARD_TEXT.to_string()),
            ws_event_type: event_types::CLIPBOARD_TEXT.to_string(),
        }
    }

    /// Wraps a screenshot result: `wsEventType = "clipboard-image-event"`,
    /// `type = null`.
    pub fn screenshot(base64: impl Into<String>) -> Self {
        Self {
            id: message_token(),
            payload: EventPayload::Image(ScreenshotPayload {
                base64: base64.into(),
            }),
            event_type: None,
            ws_event_type: event_types::CLIPBOARD_IMAGE.to_string(),
        }
    }

    /// Wraps a keyboard trigger: both tags are `"keydown-event"` and the
    /// payload carries `keyEventType = "primary"`.
    pub fn keydown() -> Self {
        Self {
            id: message_token(),
            payload: EventPayload::Keyboard(KeyboardEventPayload {
                key_event_type: "primary".to_string(),
            }),
            event_type: Some(event_types::KEYDOWN.to_string()),
            ws_event_type: event_types::KEYDOWN.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
