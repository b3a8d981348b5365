//! WebSocket Real-Time Broadcast
//!
//! Pushes server-originated events to every connected dashboard client.
//!
//! ## Architecture
//!
//! - **Hub**: owns the registry of live connections and fans events out
//! - **Connection**: one client socket plus its bounded outbound queue
//! - **Pumps**: per-connection read and write tasks
//! - **Handler**: WebSocket upgrade and connection admission
//! - **Messages**: the `{type, data}` envelope placed on the wire
//!
//! A client whose outbound queue fills up is disconnected rather than
//! allowed to slow down delivery to everyone else.
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onmessage = (event) => {
//!   const { type, data } = JSON.parse(event.data);
//!   console.log(type, data);
//! };
//! ```

mod connection;
mod handler;
mod hub;
mod messages;

pub use connection::{
    inbound_pump, outbound_pump, run_session, Connection, ConnectionId, DoneSignal,
    InboundHandler, Outbox, PumpExit, SessionOptions,
};
pub use handler::{handle_socket, websocket_handler};
pub use hub::{BroadcastReport, Hub, HubConfig, HubError, HubStats};
pub use messages::{Envelope, Frame};
