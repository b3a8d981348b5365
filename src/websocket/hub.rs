//! WebSocket Connection Hub
//!
//! Owns the registry of live connections and fans every published event
//! out to them. The registry lives behind a single mutex whose critical
//! sections only touch the map and call `try_send`, so no lock is ever
//! held across I/O or an `.await`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

use super::connection::{Connection, ConnectionId, Outbox};
use super::messages::{Envelope, Frame};

/// Manages all WebSocket connections and broadcast fan-out
pub struct Hub {
    registry: Mutex<Registry>,
    config: HubConfig,
}

/// Configuration for the hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_queue_capacity: usize,
    /// Maximum number of concurrent connections (unbounded when `None`)
    pub max_connections: Option<usize>,
    /// Close connections that send nothing for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_connections: None,
            idle_timeout: None,
        }
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    stats: Counters,
}

#[derive(Default)]
struct Counters {
    registered: u64,
    unregistered: u64,
    evicted: u64,
    published: u64,
}

/// Outcome of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the frame was enqueued for
    pub delivered: usize,
    /// Connections dropped because their queue was full or gone
    pub evicted: usize,
}

/// Point-in-time hub statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub connections: usize,
    pub registered_total: u64,
    pub unregistered_total: u64,
    pub evicted_total: u64,
    pub published_total: u64,
    pub outbound_queue_capacity: usize,
}

impl Hub {
    /// Create a new hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a connection sized to this hub's queue capacity
    ///
    /// The connection still has to be registered before it receives events.
    pub fn open_connection(&self) -> (Connection, Outbox) {
        Connection::new(self.config.outbound_queue_capacity)
    }

    /// Register a connection
    ///
    /// The connection only receives events published after this returns.
    /// An id that is already present is rejected and the registry is left
    /// untouched.
    pub fn register(&self, connection: Connection) -> Result<ConnectionId, HubError> {
        let id = connection.id();
        let mut registry = self.registry.lock();

        if registry.connections.contains_key(&id) {
            return Err(HubError::AlreadyRegistered(id));
        }
        if let Some(limit) = self.config.max_connections {
            if registry.connections.len() >= limit {
                return Err(HubError::TooManyConnections { limit });
            }
        }

        registry.connections.insert(id, connection);
        registry.stats.registered += 1;
        let count = registry.connections.len();
        drop(registry);

        tracing::info!(connection_id = %id, connections = count, "WebSocket connected");
        Ok(id)
    }

    /// Unregister a connection and close its outbound queue
    ///
    /// Returns `false` if the connection was not registered. Both pumps of
    /// a dying connection may call this; only the first call removes it.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut registry = self.registry.lock();
        // Dropping the connection drops the queue's only sender
        let removed = registry.connections.remove(&id).is_some();
        if removed {
            registry.stats.unregistered += 1;
        }
        let count = registry.connections.len();
        drop(registry);

        if removed {
            tracing::info!(connection_id = %id, connections = count, "WebSocket disconnected");
        }
        removed
    }

    /// Publish an event to every connected client
    ///
    /// Never blocks on a slow consumer. A payload that cannot be serialized
    /// is logged and delivered to nobody.
    pub fn publish(&self, event_type: &str, data: impl Serialize) -> BroadcastReport {
        match Envelope::new(event_type, data) {
            Ok(envelope) => self.broadcast(&envelope),
            Err(e) => {
                tracing::error!(
                    event_type = %event_type,
                    error = %e,
                    "Failed to serialize event payload"
                );
                BroadcastReport::default()
            }
        }
    }

    /// Broadcast an already-built envelope to every connected client
    pub fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        match envelope.encode() {
            Ok(frame) => self.broadcast_frame(&envelope.event_type, frame),
            Err(e) => {
                tracing::error!(
                    event_type = %envelope.event_type,
                    error = %e,
                    "Failed to encode envelope"
                );
                BroadcastReport::default()
            }
        }
    }

    fn broadcast_frame(&self, event_type: &str, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut registry = self.registry.lock();

        registry.connections.retain(|id, connection| {
            match connection.try_enqueue(Frame::clone(&frame)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %id,
                        "Outbound queue full, dropping slow consumer"
                    );
                    report.evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, "Outbound queue already closed");
                    report.evicted += 1;
                    false
                }
            }
        });

        registry.stats.published += 1;
        registry.stats.evicted += report.evicted as u64;
        registry.stats.unregistered += report.evicted as u64;
        drop(registry);

        tracing::trace!(
            event_type = %event_type,
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast event"
        );
        report
    }

    /// Get the current connection count
    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Check whether a connection is currently registered
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registry.lock().connections.contains_key(&id)
    }

    /// Whether a new connection would be admitted right now
    pub fn is_accepting(&self) -> bool {
        match self.config.max_connections {
            Some(limit) => self.connection_count() < limit,
            None => true,
        }
    }

    /// Snapshot of hub statistics
    pub fn stats(&self) -> HubStats {
        let registry = self.registry.lock();
        HubStats {
            connections: registry.connections.len(),
            registered_total: registry.stats.registered,
            unregistered_total: registry.stats.unregistered,
            evicted_total: registry.stats.evicted,
            published_total: registry.stats.published,
            outbound_queue_capacity: self.config.outbound_queue_capacity,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Errors that can occur in the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("Too many connections (limit: {limit})")]
    TooManyConnections { limit: usize },
}
