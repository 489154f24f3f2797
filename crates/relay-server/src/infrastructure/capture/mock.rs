//! Mock capture source for lifecycle testing.
//!
//! Records start/stop transitions without touching any hardware, so tests
//! can drive the lifecycle manager deterministically.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use super::{CaptureError, CaptureSource};

/// A [`CaptureSource`] that only counts transitions.
///
/// Cloning shares the underlying counters, so a test can keep a handle
/// while the lifecycle manager owns the boxed source.
#[derive(Clone)]
pub struct MockCaptureSource {
    name: &'static str,
    state: Arc<MockState>,
}

struct MockState {
    running: AtomicBool,
    started: AtomicUsize,
    stopped: AtomicUsize,
    fail_next_start: AtomicBool,
}

impl MockCaptureSource {
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Creates a mock reporting `name` from [`CaptureSource::name`].
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(MockState {
                running: AtomicBool::new(false),
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
                fail_next_start: AtomicBool::new(false),
            }),
        }
    }

    /// Makes the next `start()` call fail with a simulated missing device.
    pub fn fail_next_start(&self) {
        self.state.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Number of successful starts observed.
    pub fn start_count(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Number of effective stops observed.
    pub fn stop_count(&self) -> usize {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Whether the source is currently running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl Default for MockCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MockCaptureSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&self) -> Result<(), CaptureError> {
        if self.state.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable {
                source_name: self.name,
                detail: "simulated missing device".to_string(),
            });
        }
        // Idempotent: only a stopped -> running edge counts as a start.
        if !self.state.running.swap(true, Ordering::SeqCst) {
            self.state.started.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            self.state.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
