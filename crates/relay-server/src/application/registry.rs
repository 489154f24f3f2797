//! ConnectionRegistry: the live subscriber set and broadcast fan-out.
//!
//! The registry is the relay's in-memory database of every open subscriber
//! connection. Each entry maps a [`ConnectionId`] to the bounded outbound
//! queue drained by that connection's writer task.
//!
//! # Locking discipline
//!
//! The map lives behind a single `std::sync::Mutex`. Every operation holds
//! the lock only for map access; [`broadcast`](ConnectionRegistry::broadcast)
//! clones a point-in-time snapshot of the senders and delivers *after*
//! releasing the lock, so a concurrent add/remove can never corrupt
//! iteration and a slow subscriber can never stall the registry itself.
//! Delivery uses `try_send`, which never blocks.
//!
//! # Failure policy
//!
//! Delivery to each connection is independent. A *closed* queue means the
//! writer task is gone (the transport failed), so that connection is removed
//! from the registry; a *full* queue means the subscriber is not draining
//! fast enough, so that one message is dropped for that subscriber only.
//! Broadcast never raises for partial failure; it reports the number of
//! successful deliveries.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use relay_core::{ConnectionId, Envelope};

/// In-memory registry of all open subscriber connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, mpsc::Sender<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new open connection.
    ///
    /// `id` must be unique for the lifetime of the registry; identifiers are
    /// UUIDs generated at accept time and never reused, so a duplicate is a
    /// programming error, not a runtime fault.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered.
    pub fn add(&self, id: ConnectionId, sender: mpsc::Sender<String>) {
        let mut connections = self.connections.lock().expect("lock poisoned");
        let previous = connections.insert(id, sender);
        assert!(previous.is_none(), "connection id registered twice: {id}");
        debug!("registered connection {id} ({} total)", connections.len());
    }

    /// Unregisters a connection. Removing an absent id is a no-op.
    ///
    /// Returns `true` if the connection was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().expect("lock poisoned");
        let removed = connections.remove(&id).is_some();
        if removed {
            debug!("removed connection {id} ({} remaining)", connections.len());
        }
        removed
    }

    /// Current number of registered connections.
    ///
    /// This is the source of truth for the capture lifecycle refcount.
    pub fn count(&self) -> usize {
        self.connections.lock().expect("lock poisoned").len()
    }

    /// Serializes `envelope` once and attempts delivery to every registered
    /// connection.
    ///
    /// Returns the number of successful deliveries. See the module docs for
    /// the per-connection failure policy; partial failure is never an error.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                // Envelope types are all serializable; reaching this means a
                // bug in the payload definitions, not a runtime condition.
                error!("failed to serialize envelope: {e}");
                return 0;
            }
        };

        // Snapshot under the lock, deliver after releasing it.
        let snapshot: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let connections = self.connections.lock().expect("lock poisoned");
            connections
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead: Vec<ConnectionId> = Vec::new();

        for (id, sender) in snapshot {
            match sender.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "connection {id}: outbound queue full, dropping {} message",
                        envelope.ws_event_type
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    dead.push(id);
                }
            }
        }

        for id in dead {
            if self.remove(id) {
                warn!("connection {id}: send channel closed, scheduled for removal");
            }
        }

        delivered
    }

    /// Drops every registered connection, closing all outbound queues.
    ///
    /// Used on process shutdown; the writer tasks observe their queues
    /// closing and terminate, which closes the underlying transports.
    ///
    /// Returns the number of connections that were dropped.
    pub fn clear(&self) -> usize {
        let mut connections = self.connections.lock().expect("lock poisoned");
        let dropped = connections.len();
        connections.clear();
        dropped
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
