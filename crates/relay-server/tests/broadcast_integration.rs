//! Integration tests for the broadcast pipeline.
//!
//! Exercises the registry and dispatcher through their public APIs exactly
//! as the WebSocket session layer uses them: subscribers are bounded queues,
//! capture events arrive on the shared channel, and inbound subscriber text
//! goes through the dispatcher's decode path.
//!
//! Covered properties:
//!
//! - One clipboard change produces exactly one envelope, delivered to every
//!   subscriber.
//! - One screenshot command produces exactly one envelope for all
//!   subscribers (not just the requester).
//! - A failed subscriber is removed while the others still receive.
//! - Unknown and malformed commands are dropped without output.

use std::sync::Arc;

use tokio::sync::mpsc;

use relay_core::ConnectionId;
use relay_server::application::{BroadcastDispatcher, ConnectionRegistry, SignalEvent};
use relay_server::infrastructure::screenshot::ScreenshotProvider;

const STUB_IMAGE: &str = "data:image/jpeg;base64,dGVzdA==";

/// Deterministic capture backend for the dispatcher.
struct StubScreenshots(&'static str);

impl ScreenshotProvider for StubScreenshots {
    fn capture(&self) -> String {
        self.0.to_string()
    }
}

struct Harness {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    events_tx: mpsc::Sender<SignalEvent>,
}

fn harness(capture_result: &'static str) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&registry),
        Arc::new(StubScreenshots(capture_result)),
    ));
    let (events_tx, events_rx) = mpsc::channel(32);
    tokio::spawn(Arc::clone(&dispatcher).run(events_rx));
    Harness {
        registry,
        dispatcher,
        events_tx,
    }
}

fn subscribe(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<String>) {
    let id = ConnectionId::new_v4();
    let (tx, rx) = mpsc::channel(16);
    registry.add(id, tx);
    (id, rx)
}

async fn recv_json(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let raw = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an envelope")
        .expect("subscriber channel closed unexpectedly");
    serde_json::from_str(&raw).expect("envelope must be valid JSON")
}

#[tokio::test]
async fn test_single_clipboard_change_reaches_all_three_subscribers_once() {
    let harness = harness(STUB_IMAGE);
    let (_a, mut rx_a) = subscribe(&harness.registry);
    let (_b, mut rx_b) = subscribe(&harness.registry);
    let (_c, mut rx_c) = subscribe(&harness.registry);

    harness
        .events_tx
        .send(SignalEvent::ClipboardChanged("copied text".to_string()))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
        let envelope = recv_json(rx).await;
        assert_eq!(envelope["wsEventType"], "clipboard-text-event");
        assert_eq!(envelope["type"], "clipboard-text-event");
        assert_eq!(envelope["payload"]["text"], "copied text");
        // Exactly one: nothing else may be queued.
        assert!(rx.try_recv().is_err(), "subscriber received a second envelope");
    }
}

#[tokio::test]
async fn test_screenshot_command_from_one_subscriber_reaches_everyone() {
    let harness = harness(STUB_IMAGE);
    let (_a, mut rx_a) = subscribe(&harness.registry);
    let (_b, mut rx_b) = subscribe(&harness.registry);
    let (_c, mut rx_c) = subscribe(&harness.registry);

    // Subscriber "a" sends the command; the result fans out to all three.
    harness
        .dispatcher
        .handle_subscriber_text(r#"{"wsEventType":"client-screenshot-command"}"#)
        .await;

    let mut ids = Vec::new();
    for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
        let envelope = recv_json(rx).await;
        assert_eq!(envelope["wsEventType"], "clipboard-image-event");
        assert_eq!(envelope["payload"]["base64"], STUB_IMAGE);
        ids.push(envelope["id"].as_str().unwrap().to_string());
        assert!(rx.try_recv().is_err());
    }
    // One envelope, serialized once: every subscriber saw the same token.
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);
}

#[tokio::test]
async fn test_failed_subscriber_is_removed_and_the_rest_still_receive() {
    let harness = harness(STUB_IMAGE);
    let (_a, mut rx_a) = subscribe(&harness.registry);
    let (b, rx_b) = subscribe(&harness.registry);
    let (_c, mut rx_c) = subscribe(&harness.registry);
    assert_eq!(harness.registry.count(), 3);

    // Subscriber "b" dies: its queue receiver disappears.
    drop(rx_b);

    harness
        .events_tx
        .send(SignalEvent::ClipboardChanged("after failure".to_string()))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_c] {
        let envelope = recv_json(rx).await;
        assert_eq!(envelope["payload"]["text"], "after failure");
    }
    assert_eq!(harness.registry.count(), 2, "failed subscriber must be gone");
    assert!(
        !harness.registry.remove(b),
        "the failed subscriber must already have been removed"
    );
}

#[tokio::test]
async fn test_unknown_and_malformed_commands_produce_no_output() {
    let harness = harness(STUB_IMAGE);
    let (_a, mut rx_a) = subscribe(&harness.registry);

    harness
        .dispatcher
        .handle_subscriber_text(r#"{"wsEventType":"client-self-destruct-command"}"#)
        .await;
    harness.dispatcher.handle_subscriber_text("][ garbage").await;

    assert!(rx_a.try_recv().is_err(), "no envelope may be broadcast");
    assert_eq!(harness.registry.count(), 1, "connection must stay registered");
}

#[tokio::test]
async fn test_empty_screenshot_result_is_not_broadcast() {
    let harness = harness("");
    let (_a, mut rx_a) = subscribe(&harness.registry);

    harness
        .dispatcher
        .handle_subscriber_text(r#"{"wsEventType":"client-screenshot-command"}"#)
        .await;

    assert!(rx_a.try_recv().is_err(), "empty capture must be skipped");
}

#[tokio::test]
async fn test_keyboard_trigger_event_fans_out() {
    let harness = harness(STUB_IMAGE);
    let (_a, mut rx_a) = subscribe(&harness.registry);

    harness
        .events_tx
        .send(SignalEvent::KeyboardTrigger)
        .await
        .unwrap();

    let envelope = recv_json(&mut rx_a).await;
    assert_eq!(envelope["wsEventType"], "keydown-event");
    assert_eq!(envelope["payload"]["keyEventType"], "primary");
}
