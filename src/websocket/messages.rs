//! WebSocket Message Types
//!
//! Defines the envelope every broadcast event is wrapped in before it is
//! placed on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A serialized envelope.
///
/// Encoded once per publish and shared read-only by every recipient queue.
pub type Frame = Arc<str>;

/// Event sent from server to clients
///
/// Wire shape: `{"type": "<event type>", "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag (e.g., "dashboard_update")
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque event payload
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload
    pub fn new(
        event_type: impl Into<String>,
        data: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Serialize into a shareable wire frame
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}
