//! TOML-based configuration persistence for the relay daemon.
//!
//! Reads and writes [`FileConfig`] from `relay-config.toml`, kept next to
//! the executable like the certificate bundle (the relay is deployed as a
//! self-contained directory). Missing file means defaults; missing fields
//! mean their individual defaults, so old config files keep working after
//! upgrades.
//!
//! Example:
//!
//! ```toml
//! [relay]
//! log_level = "info"
//!
//! [network]
//! http_port = 9047
//! tls_port = 9048
//! bind_address = "0.0.0.0"
//!
//! [capture]
//! mic_sample_rate = 48000
//! system_sample_rate = 16000
//! clipboard_initial_delay_ms = 1000
//! clipboard_poll_interval_ms = 500
//! send_queue_capacity = 64
//!
//! [tls]
//! certificate_file = "relay-cert.sealed"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file-system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level on-disk configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub tls: TlsSection,
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener ports and bind address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Plain WebSocket listener port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// TLS WebSocket listener port.
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,
    /// IP address both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Capture cadences and rates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSection {
    /// Microphone capture rate in Hz.
    #[serde(default = "default_mic_rate")]
    pub mic_sample_rate: u32,
    /// System-loopback capture rate in Hz.
    #[serde(default = "default_system_rate")]
    pub system_sample_rate: u32,
    /// Delay before the first clipboard poll, in milliseconds.
    #[serde(default = "default_clipboard_delay_ms")]
    pub clipboard_initial_delay_ms: u64,
    /// Clipboard poll interval, in milliseconds.
    #[serde(default = "default_clipboard_interval_ms")]
    pub clipboard_poll_interval_ms: u64,
    /// Bound of each subscriber's outbound queue.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

/// Certificate bundle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// Bundle file name, resolved relative to the executable directory.
    #[serde(default = "default_certificate_file")]
    pub certificate_file: String,
    /// Optional passphrase override; the built-in default applies when
    /// absent. Never written back to disk unless the operator set it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_http_port() -> u16 {
    9047
}
fn default_tls_port() -> u16 {
    9048
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_mic_rate() -> u32 {
    48_000
}
fn default_system_rate() -> u32 {
    16_000
}
fn default_clipboard_delay_ms() -> u64 {
    1_000
}
fn default_clipboard_interval_ms() -> u64 {
    500
}
fn default_send_queue_capacity() -> usize {
    64
}
fn default_certificate_file() -> String {
    crate::domain::config::CERT_BUNDLE_FILE.to_string()
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            tls_port: default_tls_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            mic_sample_rate: default_mic_rate(),
            system_sample_rate: default_system_rate(),
            clipboard_initial_delay_ms: default_clipboard_delay_ms(),
            clipboard_poll_interval_ms: default_clipboard_interval_ms(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            certificate_file: default_certificate_file(),
            passphrase: None,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path: next to the executable.
pub fn config_file_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relay-config.toml")
}

/// Loads the config from `path` (or the default location), returning
/// `FileConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path` (or the default location).
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &FileConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
