//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ApiConfig;
use crate::websocket::{Hub, InboundHandler, SessionOptions};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Broadcast hub every WebSocket client is registered with
    pub hub: Arc<Hub>,
    /// Settings applied to each accepted WebSocket session
    pub session: SessionOptions,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create state around an existing hub
    pub fn new(hub: Arc<Hub>, config: ApiConfig) -> Self {
        let session = SessionOptions {
            idle_timeout: hub.config().idle_timeout,
            handler: None,
        };

        Self {
            hub,
            session,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Route client-sent frames to a handler instead of discarding them
    pub fn with_inbound_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.session.handler = Some(handler);
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get WebSocket connection count
    pub fn ws_connection_count(&self) -> usize {
        self.hub.connection_count()
    }
}
