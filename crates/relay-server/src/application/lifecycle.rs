//! CaptureLifecycleManager: refcount-gated start/stop of capture sources.
//!
//! Capture hardware (audio streams, the clipboard poller) runs only while at
//! least one subscriber is connected. The manager watches the registry's
//! connection count and drives every source through the state ladder:
//!
//! ```text
//! Idle ──► Starting ──► Active ──► Stopping ──► Idle
//! ```
//!
//! Transition rule: when the count rises from 0, every `Idle` source is
//! started; when it falls back to 0, every `Active` source is stopped. A
//! start failure (for example, no microphone present) logs a warning and
//! leaves that source `Idle` without affecting the other sources or the
//! connection that triggered the edge; the source is retried on the next
//! 0 -> 1 edge.
//!
//! # Locking discipline
//!
//! One manager-level mutex guards the previous count and all source states,
//! so the count check and the resulting transitions are a single atomic
//! step: rapid connection churn can never double-start or double-stop a
//! source, and no second `Starting` can begin before a prior `Stopping`
//! completes. `start()`/`stop()` are quick (they spawn or signal a worker),
//! so holding the lock across the call is acceptable.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::application::registry::ConnectionRegistry;
use crate::infrastructure::capture::CaptureSource;

/// Lifecycle state of one capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Not running; no subscriber requires it.
    Idle,
    /// Start requested; transitioning to `Active`.
    Starting,
    /// Producing events.
    Active,
    /// Stop requested; transitioning to `Idle`.
    Stopping,
}

/// One source plus its current lifecycle state.
struct ManagedSource {
    source: Box<dyn CaptureSource>,
    state: SourceState,
}

struct LifecycleInner {
    sources: Vec<ManagedSource>,
    /// Registry count observed at the end of the previous transition, used
    /// for 0 -> 1 and 1 -> 0 edge detection.
    last_count: usize,
}

/// Starts and stops capture sources as the subscriber count crosses zero.
pub struct CaptureLifecycleManager {
    registry: Arc<ConnectionRegistry>,
    inner: Mutex<LifecycleInner>,
}

impl CaptureLifecycleManager {
    /// Creates a manager owning `sources`, all initially `Idle`.
    pub fn new(registry: Arc<ConnectionRegistry>, sources: Vec<Box<dyn CaptureSource>>) -> Self {
        Self {
            registry,
            inner: Mutex::new(LifecycleInner {
                sources: sources
                    .into_iter()
                    .map(|source| ManagedSource {
                        source,
                        state: SourceState::Idle,
                    })
                    .collect(),
                last_count: 0,
            }),
        }
    }

    /// Notifies the manager that a subscriber was added to the registry.
    pub fn subscriber_connected(&self) {
        self.sync();
    }

    /// Notifies the manager that a subscriber was removed from the registry.
    pub fn subscriber_disconnected(&self) {
        self.sync();
    }

    /// Reads the registry count and performs any edge transition.
    fn sync(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let count = self.registry.count();
        let previous = inner.last_count;
        inner.last_count = count;

        if previous == 0 && count > 0 {
            info!("first subscriber connected, starting capture sources");
            start_idle_sources(&mut inner.sources);
        } else if previous > 0 && count == 0 {
            info!("last subscriber disconnected, stopping capture sources");
            stop_active_sources(&mut inner.sources);
        }
    }

    /// Stops every `Active` source unconditionally, regardless of refcount.
    ///
    /// Called on process shutdown.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.last_count = 0;
        stop_active_sources(&mut inner.sources);
    }

    /// Snapshot of `(source name, state)` pairs, for logs and tests.
    pub fn source_states(&self) -> Vec<(&'static str, SourceState)> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .sources
            .iter()
            .map(|managed| (managed.source.name(), managed.state))
            .collect()
    }
}

fn start_idle_sources(sources: &mut [ManagedSource]) {
    for managed in sources.iter_mut() {
        if managed.state != SourceState::Idle {
            continue;
        }
        managed.state = SourceState::Starting;
        match managed.source.start() {
            Ok(()) => {
                managed.state = SourceState::Active;
                info!("capture source '{}' started", managed.source.name());
            }
            Err(e) => {
                // Device unavailable is a local condition: the source stays
                // Idle and the remaining sources still start.
                managed.state = SourceState::Idle;
                warn!("capture source '{}' failed to start: {e}", managed.source.name());
            }
        }
    }
}

fn stop_active_sources(sources: &mut [ManagedSource]) {
    for managed in sources.iter_mut() {
        if managed.state != SourceState::Active {
            continue;
        }
        managed.state = SourceState::Stopping;
        managed.source.stop();
        managed.state = SourceState::Idle;
        info!("capture source '{}' stopped", managed.source.name());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::mock::MockCaptureSource;
    use relay_core::ConnectionId;
    use tokio::sync::mpsc;

    /// Registers a fake connection and reports its id so it can be removed.
    fn connect(registry: &ConnectionRegistry) -> ConnectionId {
        let id = ConnectionId::new_v4();
        let (tx, rx) = mpsc::channel(4);
        // The receiver half is intentionally leaked for the test's duration.
        std::mem::forget(rx);
        registry.add(id, tx);
        id
    }

    fn manager_with(
        sources: Vec<MockCaptureSource>,
    ) -> (Arc<ConnectionRegistry>, CaptureLifecycleManager, Vec<MockCaptureSource>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<MockCaptureSource> = sources.iter().map(MockCaptureSource::clone).collect();
        let boxed: Vec<Box<dyn CaptureSource>> = sources
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn CaptureSource>)
            .collect();
        let manager = CaptureLifecycleManager::new(Arc::clone(&registry), boxed);
        (registry, manager, handles)
    }

    #[test]
    fn test_sources_start_idle() {
        let (_registry, manager, _handles) =
            manager_with(vec![MockCaptureSource::named("mic"), MockCaptureSource::named("sys")]);
        assert!(manager
            .source_states()
            .iter()
            .all(|(_, state)| *state == SourceState::Idle));
    }

    #[test]
    fn test_first_subscriber_starts_every_source() {
        let (registry, manager, handles) =
            manager_with(vec![MockCaptureSource::named("mic"), MockCaptureSource::named("sys")]);

        connect(&registry);
        manager.subscriber_connected();

        assert!(manager
            .source_states()
            .iter()
            .all(|(_, state)| *state == SourceState::Active));
        assert_eq!(handles[0].start_count(), 1);
        assert_eq!(handles[1].start_count(), 1);
    }

    #[test]
    fn test_second_subscriber_does_not_restart_sources() {
        let (registry, manager, handles) = manager_with(vec![MockCaptureSource::named("mic")]);

        connect(&registry);
        manager.subscriber_connected();
        connect(&registry);
        manager.subscriber_connected();

        assert_eq!(handles[0].start_count(), 1, "no second start on 1 -> 2");
    }

    #[test]
    fn test_last_subscriber_stops_every_source() {
        let (registry, manager, handles) = manager_with(vec![MockCaptureSource::named("mic")]);

        let a = connect(&registry);
        let b = connect(&registry);
        manager.subscriber_connected();
        manager.subscriber_connected();

        registry.remove(a);
        manager.subscriber_disconnected();
        assert_eq!(handles[0].stop_count(), 0, "still one subscriber left");

        registry.remove(b);
        manager.subscriber_disconnected();
        assert_eq!(handles[0].stop_count(), 1);
        assert!(manager
            .source_states()
            .iter()
            .all(|(_, state)| *state == SourceState::Idle));
    }

    #[test]
    fn test_no_source_is_active_with_zero_connections() {
        let (registry, manager, _handles) = manager_with(vec![MockCaptureSource::named("mic")]);

        let id = connect(&registry);
        manager.subscriber_connected();
        registry.remove(id);
        manager.subscriber_disconnected();

        assert!(
            manager
                .source_states()
                .iter()
                .all(|(_, state)| *state != SourceState::Active),
            "sources must never be Active with zero subscribers"
        );
    }

    #[test]
    fn test_start_failure_leaves_source_idle_and_others_active() {
        let failing = MockCaptureSource::named("mic");
        failing.fail_next_start();
        let healthy = MockCaptureSource::named("sys");
        let (registry, manager, _handles) = manager_with(vec![failing, healthy]);

        connect(&registry);
        manager.subscriber_connected();

        let states = manager.source_states();
        assert_eq!(states[0], ("mic", SourceState::Idle));
        assert_eq!(states[1], ("sys", SourceState::Active));
    }

    #[test]
    fn test_failed_source_is_retried_on_next_rising_edge() {
        let flaky = MockCaptureSource::named("mic");
        flaky.fail_next_start();
        let (registry, manager, handles) = manager_with(vec![flaky]);

        let id = connect(&registry);
        manager.subscriber_connected();
        assert_eq!(manager.source_states()[0].1, SourceState::Idle);

        registry.remove(id);
        manager.subscriber_disconnected();

        // Second rising edge: the device is back.
        connect(&registry);
        manager.subscriber_connected();
        assert_eq!(manager.source_states()[0].1, SourceState::Active);
        assert_eq!(handles[0].start_count(), 1, "only the successful start counts");
    }

    #[test]
    fn test_shutdown_stops_sources_regardless_of_refcount() {
        let (registry, manager, handles) = manager_with(vec![MockCaptureSource::named("mic")]);

        connect(&registry);
        manager.subscriber_connected();
        assert_eq!(manager.source_states()[0].1, SourceState::Active);

        // Subscribers are still connected, but shutdown is unconditional.
        manager.shutdown();
        assert_eq!(handles[0].stop_count(), 1);
        assert_eq!(manager.source_states()[0].1, SourceState::Idle);
        assert!(registry.count() > 0);
    }

    #[test]
    fn test_shutdown_with_idle_sources_is_a_noop() {
        let (_registry, manager, handles) = manager_with(vec![MockCaptureSource::named("mic")]);
        manager.shutdown();
        assert_eq!(handles[0].stop_count(), 0);
    }
}
