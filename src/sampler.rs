//! Dashboard Sampler
//!
//! Periodically samples dashboard metrics and publishes each snapshot
//! through the hub. The sampler is an ordinary publisher: it never sees
//! individual connections.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SamplerConfig;
use crate::websocket::{BroadcastReport, Hub};

/// Source of dashboard metric snapshots
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Take one snapshot
    async fn sample(&self) -> Result<Value, SamplerError>;
}

/// Live dashboard figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub active_users: u32,
    pub sales_per_minute: u32,
    pub support_tickets_open: u32,
}

/// Produces plausible random dashboard figures
///
/// Stands in for real analytics until a backing store is wired up.
#[derive(Debug, Default)]
pub struct SimulatedDashboard;

impl SimulatedDashboard {
    pub fn snapshot(&self) -> DashboardSnapshot {
        let mut rng = rand::thread_rng();
        DashboardSnapshot {
            timestamp: Utc::now().timestamp(),
            active_users: 1000 + rng.gen_range(0..500),
            sales_per_minute: 10 + rng.gen_range(0..20),
            support_tickets_open: 50 + rng.gen_range(0..30),
        }
    }
}

#[async_trait]
impl MetricSource for SimulatedDashboard {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn sample(&self) -> Result<Value, SamplerError> {
        Ok(serde_json::to_value(self.snapshot())?)
    }
}

/// Publishes snapshots from a [`MetricSource`] on a fixed interval
pub struct DashboardSampler {
    hub: Arc<Hub>,
    source: Arc<dyn MetricSource>,
    config: SamplerConfig,
}

impl DashboardSampler {
    pub fn new(hub: Arc<Hub>, source: Arc<dyn MetricSource>, config: SamplerConfig) -> Self {
        Self {
            hub,
            source,
            config,
        }
    }

    /// Sample once and publish the result
    ///
    /// Returns `None` when the source failed; the failure is logged.
    pub async fn sample_once(&self) -> Option<BroadcastReport> {
        match self.source.sample().await {
            Ok(snapshot) => Some(self.hub.publish(&self.config.event_type, snapshot)),
            Err(e) => {
                tracing::warn!(source = %self.source.name(), error = %e, "Metric sampling failed");
                None
            }
        }
    }

    /// Start the sampler background task
    ///
    /// The first snapshot is published immediately. Abort the returned
    /// handle to stop sampling.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let sampler = Arc::clone(&self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sampler.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                source = %sampler.source.name(),
                interval_secs = sampler.config.interval().as_secs(),
                event_type = %sampler.config.event_type,
                "Dashboard sampler started"
            );

            loop {
                interval.tick().await;
                if let Some(report) = sampler.sample_once().await {
                    tracing::trace!(delivered = report.delivered, "Published dashboard snapshot");
                }
            }
        })
    }
}

/// Errors raised by metric sources
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Metric source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}
