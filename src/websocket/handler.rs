//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and hands the upgraded socket to the
//! hub as a new connection.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::connection::{run_session, SessionOptions};
use super::hub::Hub;
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// This is the entry point for WebSocket connections.
/// Upgrade failures are answered by axum and never reach the hub.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let options = state.session.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, options))
}

/// Register an established WebSocket and run its pumps until it dies
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, options: SessionOptions) {
    let (connection, outbox) = hub.open_connection();
    let (mut sender, receiver) = socket.split();

    if let Err(e) = hub.register(connection) {
        tracing::warn!(error = %e, "Rejecting WebSocket connection");
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            })))
            .await;
        return;
    }

    run_session(hub, outbox, sender, receiver, options).await;
}
