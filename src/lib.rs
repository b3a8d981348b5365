//! # Pulsecast
//!
//! Real-time event broadcast hub. Keeps a live set of WebSocket clients and
//! pushes every server-originated event to all of them, disconnecting any
//! client that cannot keep up instead of letting it slow everyone else down.
//!
//! ## Features
//!
//! - **Fan-out**: one serialization per event, shared by every recipient
//! - **Backpressure**: bounded per-client queues, slow consumers are dropped
//! - **Ordering**: each client sees events in publish order
//! - **Publishing**: in-process via [`Hub::publish`] or over HTTP
//! - **Dashboard feed**: periodic metric snapshots out of the box
//!
//! ## Modules
//!
//! - [`websocket`]: Hub, connections and their pumps
//! - [`api`]: HTTP server with Axum
//! - [`sampler`]: Periodic dashboard snapshot publisher
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulsecast::websocket::{Hub, HubConfig};
//! use serde_json::json;
//!
//! let hub = Hub::new(HubConfig::default());
//! let (connection, mut outbox) = hub.open_connection();
//! hub.register(connection).unwrap();
//!
//! let report = hub.publish("dashboard_update", json!({"active_users": 1200}));
//! assert_eq!(report.delivered, 1);
//! assert!(outbox.try_recv().is_ok());
//! ```

pub mod api;
pub mod config;
pub mod logging;
pub mod sampler;
pub mod websocket;

pub use api::{build_router, serve, serve_on, ApiError, AppState};

pub use websocket::{
    websocket_handler, BroadcastReport, Connection, ConnectionId, Envelope, Hub, HubError,
    HubStats, InboundHandler, Outbox, SessionOptions,
};

pub use sampler::{DashboardSampler, DashboardSnapshot, MetricSource, SamplerError, SimulatedDashboard};

pub use config::{
    generate_default_config, ApiConfig, Config, ConfigError, HubSection, LoadedConfig,
    LoggingConfig, SamplerConfig,
};
