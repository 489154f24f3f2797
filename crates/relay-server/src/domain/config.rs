//! Relay runtime configuration.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup (TOML file merged with CLI arguments) and then
//! wrapped in an `Arc` so it can be shared cheaply across all session tasks.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the relay easy to embed in tests.
//! The infrastructure layer is responsible for populating the struct from
//! the config file and CLI args.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default passphrase sealing the on-disk certificate bundle.
///
/// A fixed built-in passphrase keeps the relay self-contained on first run;
/// deployments that want a real secret override it via the config file or
/// the `RELAY_CERT_PASSPHRASE` environment variable.
pub const DEFAULT_CERT_PASSPHRASE: &str = "SignalRelay2024";

/// File name of the sealed certificate bundle, stored next to the executable.
pub const CERT_BUNDLE_FILE: &str = "relay-cert.sealed";

/// All runtime configuration for the relay daemon.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address and port of the plain WebSocket listener.
    ///
    /// `0.0.0.0` accepts connections from any interface so browsers on the
    /// LAN can subscribe; set `127.0.0.1` to restrict to local clients.
    pub http_bind_addr: SocketAddr,

    /// Address and port of the TLS WebSocket listener.
    pub tls_bind_addr: SocketAddr,

    /// Microphone capture rate in Hz (mono).
    pub mic_sample_rate: u32,

    /// System-loopback capture rate in Hz (mono).
    pub system_sample_rate: u32,

    /// Delay before the first clipboard poll after capture starts.
    pub clipboard_initial_delay: Duration,

    /// Interval between clipboard polls.
    pub clipboard_poll_interval: Duration,

    /// Bound of each connection's outbound message queue.
    ///
    /// When a subscriber's queue is full, further messages to it are dropped
    /// until it drains; a closed queue removes the subscriber entirely.
    pub send_queue_capacity: usize,

    /// Bound of the shared capture-event channel feeding the dispatcher.
    pub signal_queue_capacity: usize,

    /// Path of the sealed certificate bundle.
    pub certificate_path: PathBuf,

    /// Passphrase sealing the certificate bundle.
    pub certificate_passphrase: String,
}

impl Default for RelayConfig {
    /// Returns a `RelayConfig` matching the relay's stock deployment.
    ///
    /// | Field                    | Default                      |
    /// |--------------------------|------------------------------|
    /// | http_bind_addr           | `0.0.0.0:9047`               |
    /// | tls_bind_addr            | `0.0.0.0:9048`               |
    /// | mic_sample_rate          | 48000 Hz                     |
    /// | system_sample_rate       | 16000 Hz                     |
    /// | clipboard_initial_delay  | 1 s                          |
    /// | clipboard_poll_interval  | 500 ms                       |
    /// | send_queue_capacity      | 64 messages                  |
    /// | signal_queue_capacity    | 256 events                   |
    /// | certificate_path         | `<exe dir>/relay-cert.sealed`|
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address literals.
            http_bind_addr: "0.0.0.0:9047".parse().unwrap(),
            tls_bind_addr: "0.0.0.0:9048".parse().unwrap(),
            mic_sample_rate: 48_000,
            system_sample_rate: 16_000,
            clipboard_initial_delay: Duration::from_secs(1),
            clipboard_poll_interval: Duration::from_millis(500),
            send_queue_capacity: 64,
            signal_queue_capacity: 256,
            certificate_path: default_certificate_path(),
            certificate_passphrase: DEFAULT_CERT_PASSPHRASE.to_string(),
        }
    }
}

/// Resolves the default bundle location: next to the executable, falling
/// back to the working directory when the executable path is unavailable.
pub fn default_certificate_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CERT_BUNDLE_FILE)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
