//! Data Transfer Objects
//!
//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::websocket::BroadcastReport;

/// Request to publish an event to every connected client
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Event type tag
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload (null when omitted)
    #[serde(default)]
    pub data: Value,
}

/// Result of a publish
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub event_type: String,
    pub delivered: usize,
    pub evicted: usize,
}

impl PublishResponse {
    pub fn new(event_type: String, report: BroadcastReport) -> Self {
        Self {
            event_type,
            delivered: report.delivered,
            evicted: report.evicted,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub hub: String,
    pub connections: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
