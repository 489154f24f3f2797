//! WebSocket servers: accept loops and per-session task management.
//!
//! Two listeners run the same session logic: plain TCP on the HTTP port and
//! rustls-wrapped TCP on the TLS port. Each accepted connection is handed to
//! a dedicated tokio task, so one slow subscriber can never delay the accept
//! loop or another session.
//!
//! # Session lifecycle
//!
//! 1. Complete the WebSocket upgrade handshake.
//! 2. Register the connection: generate a fresh id, create the bounded
//!    outbound queue, add it to the registry, notify the capture lifecycle.
//! 3. Send the greeting text frame (`"Connected successfully"`).
//! 4. Run a writer task draining the queue into the WebSocket sink, while
//!    this task reads inbound frames and routes text to the dispatcher.
//! 5. On close or transport error: remove the connection exactly once and
//!    notify the lifecycle, which stops capture when the last subscriber
//!    leaves.
//!
//! # Shutdown
//!
//! Both accept loops poll a shared `AtomicBool` with a short accept timeout
//! (cross-platform Ctrl+C handling without platform signal APIs): clearing
//! the flag stops accepting within ~200 ms, and `main` then stops the
//! capture sources and clears the registry, which closes every open session.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use relay_core::ConnectionId;

use crate::application::dispatcher::BroadcastDispatcher;
use crate::application::lifecycle::CaptureLifecycleManager;
use crate::application::registry::ConnectionRegistry;
use crate::domain::RelayConfig;
use crate::infrastructure::tls::CertificateManager;

/// First text frame sent to every new subscriber.
pub const GREETING: &str = "Connected successfully";

/// How long `accept()` may block before the shutdown flag is re-checked.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Everything a session task needs, shared across all sessions.
pub struct SessionContext {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub lifecycle: Arc<CaptureLifecycleManager>,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

// ── Plain listener ────────────────────────────────────────────────────────────

/// Binds the plain WebSocket listener and serves until shutdown.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (port in use,
/// missing bind permission).
pub async fn run_plain_server(
    ctx: Arc<SessionContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(ctx.config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind plain listener on {}", ctx.config.http_bind_addr))?;
    info!("plain WebSocket listener on {}", ctx.config.http_bind_addr);
    serve_plain(listener, ctx, running).await;
    Ok(())
}

/// Accept loop over an already-bound listener (split out so tests can bind
/// to an ephemeral port themselves).
pub async fn serve_plain(listener: TcpListener, ctx: Arc<SessionContext>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set, stopping plain accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!("new subscriber connection from {peer}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_session(stream, peer, ctx).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept failure (e.g., fd exhaustion); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {
                // Timeout: no connection attempt, loop back to the flag check.
            }
        }
    }
}

// ── TLS listener ──────────────────────────────────────────────────────────────

/// Binds the TLS WebSocket listener and serves until shutdown.
///
/// The certificate is primed before the listener opens so that no handshake
/// ever waits on key generation. A certificate failure disables only this
/// listener; the plain listener keeps serving.
///
/// # Errors
///
/// Returns an error if the certificate cannot be obtained or the TCP
/// listener cannot be bound.
pub async fn run_tls_server(
    ctx: Arc<SessionContext>,
    certificates: Arc<CertificateManager>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // Key generation is CPU-bound; keep it off the async workers.
    let primed = Arc::clone(&certificates);
    tokio::task::spawn_blocking(move || primed.get_or_create())
        .await
        .context("certificate task panicked")?
        .context("TLS certificate unavailable, TLS listener disabled")?;

    let listener = TcpListener::bind(ctx.config.tls_bind_addr)
        .await
        .with_context(|| format!("failed to bind TLS listener on {}", ctx.config.tls_bind_addr))?;
    info!("TLS WebSocket listener on {}", ctx.config.tls_bind_addr);
    serve_tls(listener, ctx, certificates, running).await;
    Ok(())
}

/// Accept loop for the TLS listener.
pub async fn serve_tls(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    certificates: Arc<CertificateManager>,
    running: Arc<AtomicBool>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set, stopping TLS accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                // Certificate selection happens per handshake, like the
                // upstream listener contract; the acceptor is cached until
                // the record rotates.
                let acceptor = match certificates.acceptor() {
                    Ok(acceptor) => acceptor,
                    Err(e) => {
                        error!("TLS acceptor unavailable, dropping {peer}: {e}");
                        continue;
                    }
                };
                info!("new TLS subscriber connection from {peer}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => handle_session(tls_stream, peer, ctx).await,
                        Err(e) => debug!("TLS handshake failed with {peer}: {e}"),
                    }
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Top-level handler for one subscriber session; logs the outcome.
///
/// The outer/inner pair keeps `?`-based error propagation in
/// [`run_session`] while this function turns the result into a log line.
async fn handle_session<S>(stream: S, peer: SocketAddr, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match run_session(stream, peer, ctx).await {
        Ok(()) => info!("session {peer} closed normally"),
        Err(e) => warn!("session {peer} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one subscriber session.
async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer}"))?;

    let id = ConnectionId::new_v4();
    info!("subscriber session established: {peer} (connection {id})");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(ctx.config.send_queue_capacity);

    // Greeting rides the same queue the writer drains, so ordering with the
    // first broadcast is preserved. The queue is freshly created; the send
    // cannot fail.
    let _ = out_tx.try_send(GREETING.to_string());

    ctx.registry.add(id, out_tx);
    ctx.lifecycle.subscriber_connected();

    // Writer task: owns the sink, drains the bounded queue. Ends when the
    // queue closes (registry removal or shutdown) or the transport fails.
    let writer_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                debug!("writer for {peer}: transport send failed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Read loop: route subscriber text to the dispatcher; tolerate anything
    // else. Bad input never closes the session.
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                ctx.dispatcher.handle_subscriber_text(&text).await;
            }
            Ok(WsMessage::Close(_)) => {
                debug!("session {peer}: close frame received");
                break;
            }
            Ok(other) => {
                debug!("session {peer}: {} frame ignored", frame_kind_name(&other));
            }
            Err(WsError::ConnectionClosed | WsError::Protocol(_)) => {
                debug!("session {peer}: connection closed");
                break;
            }
            Err(e) => {
                warn!("session {peer}: transport error: {e}");
                break;
            }
        }
    }

    // Cleanup runs on every exit path. `remove` is idempotent, covering the
    // case where a failed broadcast already evicted this connection.
    ctx.registry.remove(id);
    ctx.lifecycle.subscriber_disconnected();
    writer_task.abort();

    Ok(())
}

/// Short name of a frame kind for debug logs (never logs frame contents).
fn frame_kind_name(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "raw",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_matches_wire_contract() {
        assert_eq!(GREETING, "Connected successfully");
    }

    #[test]
    fn test_frame_kind_name_binary() {
        assert_eq!(frame_kind_name(&WsMessage::Binary(vec![1, 2, 3])), "binary");
    }

    #[test]
    fn test_frame_kind_name_ping_pong() {
        assert_eq!(frame_kind_name(&WsMessage::Ping(Vec::new())), "ping");
        assert_eq!(frame_kind_name(&WsMessage::Pong(Vec::new())), "pong");
    }

    #[test]
    fn test_frame_kind_name_does_not_expose_contents() {
        let name = frame_kind_name(&WsMessage::Text("secret payload".to_string()));
        assert_eq!(name, "text");
        assert!(!name.contains("secret"));
    }
}
