//! Audio frame domain types and PCM16 normalization.
//!
//! The relay forwards audio as batches of floating-point samples in the
//! range [-1.0, 1.0]. Hardware delivers signed 16-bit PCM; normalization is
//! a fixed division by 32768 so that the most negative sample (-32768) maps
//! to exactly -1.0 and the most positive (32767) lands just below 1.0.

use std::fmt;

use serde::Serialize;

/// Divisor used to normalize signed 16-bit PCM samples.
pub const PCM16_SCALE: f32 = 32768.0;

/// Identifies which capture source produced an audio frame.
///
/// Serializes to the wire tags `"mic"` and `"system"` used in the
/// `audioType` field of audio-data payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceKind {
    /// The default microphone input.
    Mic,
    /// The system-loopback ("what you hear") input.
    System,
}

impl AudioSourceKind {
    /// Returns the wire tag for this source.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSourceKind::Mic => "mic",
            AudioSourceKind::System => "system",
        }
    }
}

impl fmt::Display for AudioSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized batch of audio samples from a single capture source.
///
/// A frame corresponds to exactly one hardware data-ready callback. Frames
/// are broadcast immediately and never retained afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Which source produced the samples.
    pub source: AudioSourceKind,
    /// Samples normalized to [-1.0, 1.0], in capture order.
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Creates a frame from already-normalized samples.
    pub fn new(source: AudioSourceKind, samples: Vec<f32>) -> Self {
        Self { source, samples }
    }

    /// Creates a frame from raw little-endian PCM16 bytes.
    pub fn from_pcm16_bytes(source: AudioSourceKind, bytes: &[u8]) -> Self {
        Self {
            source,
            samples: normalize_pcm16_bytes(bytes),
        }
    }
}

/// Normalizes signed 16-bit samples to [-1.0, 1.0] by dividing by 32768.
pub fn normalize_pcm16_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / PCM16_SCALE).collect()
}

/// Normalizes raw little-endian PCM16 bytes to [-1.0, 1.0].
///
/// A trailing odd byte (an incomplete sample) is ignored.
pub fn normalize_pcm16_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
