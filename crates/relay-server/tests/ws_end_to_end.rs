//! End-to-end test over real WebSocket connections.
//!
//! Boots the plain accept loop on an ephemeral port with mock capture
//! sources and a stub screenshot backend, connects three real WebSocket
//! subscribers, and verifies the whole subscriber-visible behavior:
//! greeting frame, lifecycle activation, clipboard fan-out,
//! screenshot-command fan-out, and cleanup on disconnect.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relay_server::application::{
    BroadcastDispatcher, CaptureLifecycleManager, ConnectionRegistry, SignalEvent, SourceState,
};
use relay_server::domain::RelayConfig;
use relay_server::infrastructure::capture::mock::MockCaptureSource;
use relay_server::infrastructure::capture::CaptureSource;
use relay_server::infrastructure::screenshot::ScreenshotProvider;
use relay_server::infrastructure::ws_server::{serve_plain, SessionContext, GREETING};

const STUB_IMAGE: &str = "data:image/jpeg;base64,ZTJl";

struct StubScreenshots;

impl ScreenshotProvider for StubScreenshots {
    fn capture(&self) -> String {
        STUB_IMAGE.to_string()
    }
}

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Server {
    addr: std::net::SocketAddr,
    registry: Arc<ConnectionRegistry>,
    lifecycle: Arc<CaptureLifecycleManager>,
    events_tx: mpsc::Sender<SignalEvent>,
    sources: Vec<MockCaptureSource>,
    running: Arc<AtomicBool>,
}

async fn start_server() -> Server {
    let config = Arc::new(RelayConfig::default());
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&registry),
        Arc::new(StubScreenshots),
    ));
    let (events_tx, events_rx) = mpsc::channel(32);
    tokio::spawn(Arc::clone(&dispatcher).run(events_rx));

    let sources = vec![
        MockCaptureSource::named("microphone"),
        MockCaptureSource::named("system-audio"),
    ];
    let boxed: Vec<Box<dyn CaptureSource>> = sources
        .iter()
        .map(|source| Box::new(source.clone()) as Box<dyn CaptureSource>)
        .collect();
    let lifecycle = Arc::new(CaptureLifecycleManager::new(Arc::clone(&registry), boxed));

    let ctx = Arc::new(SessionContext {
        config,
        registry: Arc::clone(&registry),
        lifecycle: Arc::clone(&lifecycle),
        dispatcher,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve_plain(listener, ctx, Arc::clone(&running)));

    Server {
        addr,
        registry,
        lifecycle,
        events_tx,
        sources,
        running,
    }
}

async fn connect(server: &Server) -> Client {
    let (client, _response) = connect_async(format!("ws://{}", server.addr))
        .await
        .expect("WebSocket connect failed");
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed unexpectedly")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    serde_json::from_str(&next_text(client).await).expect("expected JSON envelope")
}

/// Polls until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within the deadline");
}

#[tokio::test]
async fn test_three_subscribers_full_round_trip() {
    let server = start_server().await;

    // Three real subscribers connect; each is greeted first.
    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = connect(&server).await;
        assert_eq!(next_text(&mut client).await, GREETING);
        clients.push(client);
    }
    wait_until(|| server.registry.count() == 3).await;

    // The first accept activates every capture source.
    wait_until(|| {
        server
            .lifecycle
            .source_states()
            .iter()
            .all(|(_, state)| *state == SourceState::Active)
    })
    .await;

    // One simulated clipboard change: exactly one envelope per subscriber.
    server
        .events_tx
        .send(SignalEvent::ClipboardChanged("e2e text".to_string()))
        .await
        .unwrap();
    for client in &mut clients {
        let envelope = next_json(client).await;
        assert_eq!(envelope["wsEventType"], "clipboard-text-event");
        assert_eq!(envelope["payload"]["text"], "e2e text");
    }

    // One screenshot command from subscriber 0: fans out to all three.
    clients[0]
        .send(Message::Text(
            r#"{"wsEventType":"client-screenshot-command"}"#.to_string(),
        ))
        .await
        .unwrap();
    for client in &mut clients {
        let envelope = next_json(client).await;
        assert_eq!(envelope["wsEventType"], "clipboard-image-event");
        assert_eq!(envelope["payload"]["base64"], STUB_IMAGE);
    }

    // A malformed command neither answers nor disconnects anyone.
    clients[1]
        .send(Message::Text("{{ not json".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.count(), 3);

    // Subscribers leave one by one; the last close idles the sources.
    for client in clients.drain(..) {
        drop(client);
    }
    wait_until(|| server.registry.count() == 0).await;
    wait_until(|| {
        server
            .lifecycle
            .source_states()
            .iter()
            .all(|(_, state)| *state == SourceState::Idle)
    })
    .await;
    for source in &server.sources {
        assert_eq!(source.start_count(), 1, "one start across the session burst");
        assert_eq!(source.stop_count(), 1, "one stop when the last left");
    }

    server.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_abrupt_disconnect_is_cleaned_up_and_broadcast_continues() {
    let server = start_server().await;

    let mut keeper = connect(&server).await;
    assert_eq!(next_text(&mut keeper).await, GREETING);
    let mut dropper = connect(&server).await;
    assert_eq!(next_text(&mut dropper).await, GREETING);
    wait_until(|| server.registry.count() == 2).await;

    // Kill one subscriber without a close handshake.
    drop(dropper);
    wait_until(|| server.registry.count() == 1).await;

    server
        .events_tx
        .send(SignalEvent::ClipboardChanged("still flowing".to_string()))
        .await
        .unwrap();
    let envelope = next_json(&mut keeper).await;
    assert_eq!(envelope["payload"]["text"], "still flowing");

    // Capture stays active for the surviving subscriber.
    assert!(server
        .lifecycle
        .source_states()
        .iter()
        .all(|(_, state)| *state == SourceState::Active));

    server.running.store(false, Ordering::Relaxed);
}
