//! On-demand primary-display capture.
//!
//! Invoked once per explicit trigger (subscriber command or the host hotkey
//! collaborator), never on a timer. The capture is synchronous: grab the
//! primary monitor with xcap, encode as JPEG, and return a
//! `data:image/jpeg;base64,...` URI.
//!
//! Failure is not an error to callers: a headless host or a capture denial
//! yields an empty string, which callers treat as "no screenshot available"
//! and skip the broadcast.

use base64::Engine;
use tracing::{debug, warn};

/// JPEG quality used for screenshot encoding.
const JPEG_QUALITY: u8 = 80;

/// Trait abstracting the display-capture backend.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenshotProvider: Send + Sync {
    /// Captures the primary display.
    ///
    /// Returns a `data:image/jpeg;base64,...` URI, or an empty string when
    /// no screenshot is available.
    fn capture(&self) -> String;
}

/// xcap-backed capture of the primary monitor.
pub struct PrimaryDisplayCapturer;

impl PrimaryDisplayCapturer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PrimaryDisplayCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenshotProvider for PrimaryDisplayCapturer {
    fn capture(&self) -> String {
        match capture_primary_monitor() {
            Ok(uri) => uri,
            Err(detail) => {
                warn!("screenshot capture failed: {detail}");
                String::new()
            }
        }
    }
}

/// Grabs the primary monitor and encodes it as a JPEG data URI.
fn capture_primary_monitor() -> Result<String, String> {
    let monitors = xcap::Monitor::all().map_err(|e| e.to_string())?;
    let monitor = monitors
        .iter()
        .find(|monitor| monitor.is_primary())
        .or_else(|| monitors.first())
        .ok_or_else(|| "no monitor available".to_string())?;

    let capture = monitor.capture_image().map_err(|e| e.to_string())?;
    let (width, height) = (capture.width(), capture.height());
    debug!(
        "captured {width}x{height} screenshot from '{}'",
        monitor.name()
    );

    encode_jpeg_data_uri(width, height, capture.into_raw())
}

/// JPEG-encodes a raw RGBA capture and wraps it as a base64 data URI.
fn encode_jpeg_data_uri(width: u32, height: u32, rgba: Vec<u8>) -> Result<String, String> {
    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| "capture buffer size mismatch".to_string())?;
    // JPEG has no alpha channel; flatten before encoding.
    let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).map_err(|e| e.to_string())?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(format!("data:image/jpeg;base64,{encoded}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgba(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        pixel
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect()
    }

    #[test]
    fn test_encode_produces_jpeg_data_uri() {
        let uri = encode_jpeg_data_uri(4, 4, solid_rgba(4, 4, [200, 10, 10, 255])).unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"), "got {uri}");
        assert!(uri.len() > "data:image/jpeg;base64,".len());
    }

    #[test]
    fn test_encoded_payload_is_valid_base64_jpeg() {
        let uri = encode_jpeg_data_uri(8, 8, solid_rgba(8, 8, [0, 128, 255, 255])).unwrap();
        let payload = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        // JPEG magic: FF D8 ... FF D9
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_undersized_buffer_is_rejected() {
        let result = encode_jpeg_data_uri(4, 4, vec![0u8; 7]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_provider_empty_result_contract() {
        let mut provider = MockScreenshotProvider::new();
        provider.expect_capture().returning(String::new);
        assert!(provider.capture().is_empty());
    }
}
