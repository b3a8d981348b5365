//! Event Routes
//!
//! Lets HTTP collaborators push events through the hub.
//!
//! - POST /api/v1/events - Broadcast `{type, data}` to every client
//! - GET /api/v1/hub/stats - Hub statistics

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{PublishRequest, PublishResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::websocket::HubStats;

/// POST /api/v1/events
///
/// Accepted once the event has been handed to every live connection's
/// queue; delivery itself is not acknowledged.
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let event_type = request.event_type.trim();
    if event_type.is_empty() {
        return Err(ApiError::Validation("Event type must not be empty".to_string()));
    }

    let report = state.hub.publish(event_type, &request.data);
    tracing::debug!(
        event_type = %event_type,
        delivered = report.delivered,
        evicted = report.evicted,
        "Published event"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse::new(event_type.to_string(), report)),
    ))
}

/// GET /api/v1/hub/stats
pub async fn hub_stats(State(state): State<Arc<AppState>>) -> Json<HubStats> {
    Json(state.hub.stats())
}
