//! Signal Relay daemon entry point.
//!
//! Wires the capture sources, the broadcast pipeline, and the two WebSocket
//! listeners together, then runs until Ctrl+C.
//!
//! ```text
//! main()
//!  └─ load config (TOML file merged with CLI/env overrides)
//!  └─ build pipeline
//!       ├─ ConnectionRegistry          subscriber set + fan-out
//!       ├─ BroadcastDispatcher         events/commands -> envelopes
//!       ├─ MicrophoneSource            cpal, 48 kHz mono
//!       ├─ SystemAudioSource           cpal loopback, 16 kHz mono
//!       ├─ ClipboardWatcher            500 ms poll after 1 s delay
//!       ├─ CaptureLifecycleManager     refcount-gated start/stop
//!       └─ CertificateManager          self-signed TLS identity
//!  └─ serve
//!       ├─ plain WebSocket listener    port 9047
//!       └─ TLS WebSocket listener      port 9048 (best-effort)
//! ```
//!
//! # Configuration precedence
//!
//! CLI argument (or its environment variable) over config-file value over
//! built-in default. The config file lives next to the executable as
//! `relay-config.toml`; see `infrastructure::storage` for the schema.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_server::application::{BroadcastDispatcher, CaptureLifecycleManager, ConnectionRegistry};
use relay_server::domain::config::{
    default_certificate_path, RelayConfig, DEFAULT_CERT_PASSPHRASE,
};
use relay_server::infrastructure::capture::{CaptureSource, MicrophoneSource, SystemAudioSource};
use relay_server::infrastructure::clipboard::{ArboardClipboard, ClipboardWatcher};
use relay_server::infrastructure::screenshot::{PrimaryDisplayCapturer, ScreenshotProvider};
use relay_server::infrastructure::storage::{self, FileConfig};
use relay_server::infrastructure::tls::CertificateManager;
use relay_server::infrastructure::ws_server::{run_plain_server, run_tls_server, SessionContext};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Signal Relay daemon.
///
/// Captures host signals (microphone, system audio, clipboard, screenshots)
/// and fans them out to WebSocket subscribers over plain and TLS endpoints.
#[derive(Debug, Parser)]
#[command(
    name = "relay-server",
    about = "Local host-signal relay with WebSocket fan-out and managed TLS",
    version
)]
struct Cli {
    /// Plain WebSocket listener port.
    #[arg(long, env = "RELAY_HTTP_PORT")]
    http_port: Option<u16>,

    /// TLS WebSocket listener port.
    #[arg(long, env = "RELAY_TLS_PORT")]
    tls_port: Option<u16>,

    /// Bind address for both listeners (e.g. `0.0.0.0` or `127.0.0.1`).
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Passphrase sealing the certificate bundle.
    ///
    /// Overrides the config file and the built-in default; prefer the
    /// environment variable so the secret stays out of shell history.
    #[arg(long, env = "RELAY_CERT_PASSPHRASE")]
    cert_passphrase: Option<String>,

    /// Path of the TOML config file (default: next to the executable).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

/// Merges the config file and CLI overrides into the runtime config.
fn build_config(file: &FileConfig, cli: &Cli) -> anyhow::Result<RelayConfig> {
    let defaults = RelayConfig::default();

    let bind = cli
        .bind
        .clone()
        .unwrap_or_else(|| file.network.bind_address.clone());
    let http_port = cli.http_port.unwrap_or(file.network.http_port);
    let tls_port = cli.tls_port.unwrap_or(file.network.tls_port);

    let http_bind_addr: SocketAddr = format!("{bind}:{http_port}")
        .parse()
        .with_context(|| format!("invalid plain bind address: '{bind}:{http_port}'"))?;
    let tls_bind_addr: SocketAddr = format!("{bind}:{tls_port}")
        .parse()
        .with_context(|| format!("invalid TLS bind address: '{bind}:{tls_port}'"))?;

    let certificate_passphrase = cli
        .cert_passphrase
        .clone()
        .or_else(|| file.tls.passphrase.clone())
        .unwrap_or_else(|| DEFAULT_CERT_PASSPHRASE.to_string());

    Ok(RelayConfig {
        http_bind_addr,
        tls_bind_addr,
        mic_sample_rate: file.capture.mic_sample_rate,
        system_sample_rate: file.capture.system_sample_rate,
        clipboard_initial_delay: Duration::from_millis(file.capture.clipboard_initial_delay_ms),
        clipboard_poll_interval: Duration::from_millis(file.capture.clipboard_poll_interval_ms),
        send_queue_capacity: file.capture.send_queue_capacity.max(1),
        signal_queue_capacity: defaults.signal_queue_capacity,
        certificate_path: resolve_certificate_path(&file.tls.certificate_file),
        certificate_passphrase,
    })
}

/// Resolves the bundle file name against the executable directory; absolute
/// paths are used as-is.
fn resolve_certificate_path(file_name: &str) -> PathBuf {
    let path = Path::new(file_name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        default_certificate_path().with_file_name(file_name)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_config =
        storage::load_config(cli.config.as_deref()).context("failed to load config file")?;

    // Structured logging; `RUST_LOG` wins over the config-file level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(file_config.relay.log_level.clone())),
        )
        .init();

    let config = Arc::new(build_config(&file_config, &cli)?);
    let device = relay_core::DeviceInfo::collect();
    info!(
        "Signal Relay starting on {} [{}] (plain={}, tls={})",
        device.name, device.platform, config.http_bind_addr, config.tls_bind_addr
    );

    // Capture-event channel: hardware callbacks feed it, the dispatcher
    // drains it. Bounded so a stalled dispatcher sheds frames instead of
    // growing without limit.
    let (events_tx, events_rx) = mpsc::channel(config.signal_queue_capacity);

    let registry = Arc::new(ConnectionRegistry::new());
    let screenshots: Arc<dyn ScreenshotProvider> = Arc::new(PrimaryDisplayCapturer::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(Arc::clone(&registry), screenshots));
    tokio::spawn(Arc::clone(&dispatcher).run(events_rx));

    let sources: Vec<Box<dyn CaptureSource>> = vec![
        Box::new(MicrophoneSource::new(
            events_tx.clone(),
            config.mic_sample_rate,
        )),
        Box::new(SystemAudioSource::new(
            events_tx.clone(),
            config.system_sample_rate,
        )),
        Box::new(ClipboardWatcher::new(
            events_tx.clone(),
            Arc::new(ArboardClipboard::new()),
            config.clipboard_initial_delay,
            config.clipboard_poll_interval,
        )),
    ];
    let lifecycle = Arc::new(CaptureLifecycleManager::new(Arc::clone(&registry), sources));

    let certificates = Arc::new(CertificateManager::new(
        config.certificate_path.clone(),
        config.certificate_passphrase.clone(),
    ));

    // Shutdown flag shared by both accept loops.
    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_signal.store(false, Ordering::Relaxed);
        }
    });

    let ctx = Arc::new(SessionContext {
        config: Arc::clone(&config),
        registry: Arc::clone(&registry),
        lifecycle: Arc::clone(&lifecycle),
        dispatcher: Arc::clone(&dispatcher),
    });

    let plain_task = tokio::spawn(run_plain_server(Arc::clone(&ctx), Arc::clone(&running)));
    let tls_task = tokio::spawn(run_tls_server(
        Arc::clone(&ctx),
        certificates,
        Arc::clone(&running),
    ));

    let (plain_result, tls_result) = tokio::join!(plain_task, tls_task);

    // The TLS endpoint is best-effort: a certificate or bind failure there
    // must not take the plain endpoint down with it.
    match tls_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("TLS listener stopped: {e:#}"),
        Err(e) => error!("TLS listener task panicked: {e}"),
    }
    plain_result.context("plain listener task panicked")??;

    // Unconditional teardown: stop every active capture source regardless of
    // refcount, then close every subscriber connection.
    lifecycle.shutdown();
    let closed = registry.clear();
    info!("Signal Relay stopped ({closed} connection(s) closed)");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
