//! Connections and their pumps
//!
//! A connection is split in two halves. The hub keeps the [`Connection`]
//! (identity plus the sending end of a bounded queue) in its registry; the
//! [`Outbox`] (receiving end) goes to the outbound pump. Removing the
//! connection from the registry drops the only sender, which closes the
//! queue and lets the outbound pump finish.
//!
//! Each connection runs two tasks that share one [`DoneSignal`]:
//!
//! - the **inbound pump** reads frames until the peer closes, a read fails,
//!   or the idle timeout elapses, then unregisters the connection
//! - the **outbound pump** writes queued frames until the queue closes or a
//!   write fails, then closes the transport
//!
//! Whichever pump stops first fires the done signal so the other one never
//! outlives it.

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::hub::Hub;
use super::messages::Frame;

/// Unique identifier for a WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hub-side half of a connection
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
}

/// Pump-side half of a connection: the outbound queue's receiving end
pub struct Outbox {
    id: ConnectionId,
    receiver: mpsc::Receiver<Frame>,
}

impl Connection {
    /// Create a connection with a fresh id and a queue of `capacity` frames
    pub fn new(capacity: usize) -> (Connection, Outbox) {
        Self::with_id(ConnectionId::new(), capacity)
    }

    /// Create a connection with a caller-chosen id
    pub fn with_id(id: ConnectionId, capacity: usize) -> (Connection, Outbox) {
        // tokio panics on a zero-capacity channel
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Connection { id, sender }, Outbox { id, receiver })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn try_enqueue(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        self.sender.try_send(frame)
    }
}

impl Outbox {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next queued frame; `None` once the queue is closed and empty
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// One-shot "this connection is finished" flag shared by both pumps
#[derive(Clone)]
pub struct DoneSignal(Arc<watch::Sender<bool>>);

impl DoneSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn fire(&self) {
        self.0.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`fire`](Self::fire) has been called
    pub async fn fired(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in self, so this only returns once the flag is set
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives text and binary frames sent by clients
///
/// Clients are pure consumers by default; install a handler to act on
/// what they send.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_frame(&self, connection_id: ConnectionId, message: Message);
}

/// Per-session settings shared by every connection the server accepts
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// End the connection after this much inbound silence
    pub idle_timeout: Option<Duration>,
    /// Handler for client-sent frames (discarded when `None`)
    pub handler: Option<Arc<dyn InboundHandler>>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("idle_timeout", &self.idle_timeout)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The peer sent a close frame or the stream ended
    PeerClosed,
    /// Reading from the transport failed
    ReadError,
    /// No inbound frame within the idle timeout
    IdleTimeout,
    /// The outbound queue was closed by the hub
    QueueClosed,
    /// Writing to the transport failed
    WriteError,
    /// The other pump finished first
    Cancelled,
}

/// Read frames until the connection dies, then unregister it
pub async fn inbound_pump<R, E>(
    id: ConnectionId,
    mut stream: R,
    hub: Arc<Hub>,
    options: SessionOptions,
    done: DoneSignal,
) -> PumpExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let exit = loop {
        let read = async {
            match options.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next()).await.ok(),
                None => Some(stream.next().await),
            }
        };

        let next = tokio::select! {
            biased;
            _ = done.fired() => break PumpExit::Cancelled,
            next = read => next,
        };

        match next {
            None => {
                tracing::debug!(connection_id = %id, "WebSocket idle timeout");
                break PumpExit::IdleTimeout;
            }
            Some(None) | Some(Some(Ok(Message::Close(_)))) => {
                tracing::debug!(connection_id = %id, "Client closed connection");
                break PumpExit::PeerClosed;
            }
            Some(Some(Err(e))) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket receive error");
                break PumpExit::ReadError;
            }
            Some(Some(Ok(message @ (Message::Text(_) | Message::Binary(_))))) => {
                if let Some(handler) = &options.handler {
                    // A stuck handler must not outlive the session
                    tokio::select! {
                        biased;
                        _ = done.fired() => break PumpExit::Cancelled,
                        _ = handler.on_frame(id, message) => {}
                    }
                }
            }
            // Pings are answered by the transport
            Some(Some(Ok(_))) => {}
        }
    };

    hub.unregister(id);
    done.fire();
    exit
}

/// Write queued frames to the transport until the queue closes or a write fails
pub async fn outbound_pump<S>(outbox: Outbox, mut sink: S, done: DoneSignal) -> PumpExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let Outbox { id, mut receiver } = outbox;

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = done.fired() => break PumpExit::Cancelled,
            next = receiver.recv() => next,
        };

        match next {
            // axum text frames own their String, so each recipient copies here
            Some(frame) => {
                if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                    tracing::debug!(
                        connection_id = %id,
                        error = %e,
                        "WebSocket send failed, closing connection"
                    );
                    break PumpExit::WriteError;
                }
            }
            None => {
                let _ = sink.send(Message::Close(None)).await;
                break PumpExit::QueueClosed;
            }
        }
    };

    let _ = sink.close().await;
    done.fire();
    exit
}

/// Run both pumps of a registered connection to completion
///
/// Returns the inbound and outbound exit reasons.
pub async fn run_session<R, S, E>(
    hub: Arc<Hub>,
    outbox: Outbox,
    sink: S,
    stream: R,
    options: SessionOptions,
) -> (PumpExit, PumpExit)
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
{
    let id = outbox.id();
    let done = DoneSignal::new();

    let outbound = tokio::spawn(outbound_pump(outbox, sink, done.clone()));
    let inbound = tokio::spawn(inbound_pump(id, stream, Arc::clone(&hub), options, done));

    let (inbound_exit, outbound_exit) = tokio::join!(inbound, outbound);

    let inbound_exit = inbound_exit.unwrap_or_else(|e| {
        tracing::error!(connection_id = %id, error = %e, "Inbound pump panicked");
        hub.unregister(id);
        PumpExit::Cancelled
    });
    let outbound_exit = outbound_exit.unwrap_or_else(|e| {
        tracing::error!(connection_id = %id, error = %e, "Outbound pump panicked");
        PumpExit::Cancelled
    });

    tracing::debug!(
        connection_id = %id,
        inbound = ?inbound_exit,
        outbound = ?outbound_exit,
        "WebSocket session ended"
    );
    (inbound_exit, outbound_exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::HubConfig;
    use futures_util::stream;
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Debug)]
    struct TransportError;

    impl fmt::Display for TransportError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("transport error")
        }
    }

    /// Sink that records everything written to it
    fn recording_sink(
        written: Arc<Mutex<Vec<Message>>>,
    ) -> impl Sink<Message, Error = TransportError> + Unpin + Send + 'static {
        Box::pin(futures_util::sink::unfold(written, |written, message: Message| async move {
            written.lock().push(message);
            Ok::<_, TransportError>(written)
        }))
    }

    /// Sink whose every write fails
    fn failing_sink() -> impl Sink<Message, Error = TransportError> + Unpin + Send + 'static {
        Box::pin(futures_util::sink::unfold((), |_, _message: Message| async move {
            Err::<(), _>(TransportError)
        }))
    }

    /// Stream that never yields, like a client that stays silent
    fn silent_stream() -> impl Stream<Item = Result<Message, TransportError>> + Unpin + Send + 'static {
        stream::pending()
    }

    fn text_of(message: &Message) -> Option<&str> {
        match message {
            Message::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    struct CountingHandler(Mutex<Vec<ConnectionId>>);

    #[async_trait]
    impl InboundHandler for CountingHandler {
        async fn on_frame(&self, connection_id: ConnectionId, _message: Message) {
            self.0.lock().push(connection_id);
        }
    }

    /// Handler that never finishes, announcing when it is entered
    struct StalledHandler(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl InboundHandler for StalledHandler {
        async fn on_frame(&self, _connection_id: ConnectionId, _message: Message) {
            self.0.notify_one();
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (connection, mut outbox) = Connection::new(0);
        assert_eq!(connection.id(), outbox.id());

        connection.try_enqueue(Frame::from("x")).unwrap();
        assert!(connection.try_enqueue(Frame::from("y")).is_err());
        assert_eq!(&*outbox.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_done_signal() {
        let done = DoneSignal::new();
        assert!(!done.is_fired());

        let waiter = {
            let done = done.clone();
            tokio::spawn(async move { done.fired().await })
        };
        done.fire();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(done.is_fired());
        // Already fired resolves immediately
        done.fired().await;
    }

    #[tokio::test]
    async fn test_outbound_writes_in_order_then_closes() {
        let hub = Hub::default();
        let (connection, outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        hub.publish("first", Value::Null);
        hub.publish("second", Value::Null);
        hub.unregister(id);

        let written = Arc::new(Mutex::new(Vec::new()));
        let done = DoneSignal::new();
        let exit = outbound_pump(outbox, recording_sink(Arc::clone(&written)), done.clone()).await;

        assert_eq!(exit, PumpExit::QueueClosed);
        assert!(done.is_fired());

        let written = written.lock();
        assert_eq!(written.len(), 3);
        assert!(text_of(&written[0]).unwrap().contains("\"first\""));
        assert!(text_of(&written[1]).unwrap().contains("\"second\""));
        assert!(matches!(written[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_outbound_stops_on_write_error() {
        let hub = Hub::default();
        let (connection, outbox) = hub.open_connection();
        hub.register(connection).unwrap();
        hub.publish("ping", Value::Null);

        let done = DoneSignal::new();
        let exit = outbound_pump(outbox, failing_sink(), done.clone()).await;

        assert_eq!(exit, PumpExit::WriteError);
        assert!(done.is_fired());
    }

    #[tokio::test]
    async fn test_outbound_cancelled_by_done() {
        let (_connection, outbox) = Connection::new(4);
        let written = Arc::new(Mutex::new(Vec::new()));
        let done = DoneSignal::new();
        done.fire();

        let exit = outbound_pump(outbox, recording_sink(Arc::clone(&written)), done).await;

        assert_eq!(exit, PumpExit::Cancelled);
        assert!(written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_end_of_stream_unregisters() {
        let hub = Arc::new(Hub::default());
        let (connection, _outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let frames = stream::iter(vec![
            Ok::<_, TransportError>(Message::Text("hello".into())),
            Ok(Message::Ping(vec![1])),
        ]);
        let done = DoneSignal::new();
        let exit = inbound_pump(id, frames, Arc::clone(&hub), SessionOptions::default(), done.clone()).await;

        assert_eq!(exit, PumpExit::PeerClosed);
        assert!(!hub.is_registered(id));
        assert!(done.is_fired());
    }

    #[tokio::test]
    async fn test_inbound_close_frame_stops_reading() {
        let hub = Arc::new(Hub::default());
        let (connection, _outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let handler = Arc::new(CountingHandler(Mutex::new(Vec::new())));
        let options = SessionOptions {
            handler: Some(handler.clone()),
            ..SessionOptions::default()
        };
        let frames = stream::iter(vec![
            Ok::<_, TransportError>(Message::Text("one".into())),
            Ok(Message::Binary(vec![2])),
            Ok(Message::Close(None)),
            Ok(Message::Text("never read".into())),
        ]);

        let exit = inbound_pump(id, frames, Arc::clone(&hub), options, DoneSignal::new()).await;

        assert_eq!(exit, PumpExit::PeerClosed);
        assert_eq!(*handler.0.lock(), vec![id, id]);
        assert!(!hub.is_registered(id));
    }

    #[tokio::test]
    async fn test_inbound_read_error_unregisters() {
        let hub = Arc::new(Hub::default());
        let (connection, _outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let frames = stream::iter(vec![Err::<Message, _>(TransportError)]);
        let exit = inbound_pump(id, frames, Arc::clone(&hub), SessionOptions::default(), DoneSignal::new()).await;

        assert_eq!(exit, PumpExit::ReadError);
        assert!(!hub.is_registered(id));
    }

    #[tokio::test]
    async fn test_inbound_idle_timeout() {
        let hub = Arc::new(Hub::default());
        let (connection, _outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let options = SessionOptions {
            idle_timeout: Some(Duration::from_millis(50)),
            ..SessionOptions::default()
        };
        let exit = inbound_pump(id, silent_stream(), Arc::clone(&hub), options, DoneSignal::new()).await;

        assert_eq!(exit, PumpExit::IdleTimeout);
        assert!(!hub.is_registered(id));
    }

    #[tokio::test]
    async fn test_session_ends_when_hub_evicts() {
        let hub = Arc::new(Hub::new(HubConfig {
            outbound_queue_capacity: 4,
            ..HubConfig::default()
        }));
        let (connection, outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let written = Arc::new(Mutex::new(Vec::new()));
        let session = tokio::spawn(run_session(
            Arc::clone(&hub),
            outbox,
            recording_sink(Arc::clone(&written)),
            silent_stream(),
            SessionOptions::default(),
        ));

        hub.publish("ping", Value::Null);
        hub.unregister(id);

        let (inbound, outbound) = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outbound, PumpExit::QueueClosed);
        assert_eq!(inbound, PumpExit::Cancelled);
        assert!(matches!(written.lock().last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_session_write_failure_unregisters() {
        let hub = Arc::new(Hub::default());
        let (connection, outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();
        hub.publish("ping", Value::Null);

        let (inbound, outbound) = tokio::time::timeout(
            Duration::from_secs(5),
            run_session(
                Arc::clone(&hub),
                outbox,
                failing_sink(),
                silent_stream(),
                SessionOptions::default(),
            ),
        )
        .await
        .unwrap();

        assert_eq!(outbound, PumpExit::WriteError);
        assert_eq!(inbound, PumpExit::Cancelled);
        assert!(!hub.is_registered(id));
    }

    #[tokio::test]
    async fn test_stalled_handler_does_not_outlive_eviction() {
        let hub = Arc::new(Hub::default());
        let (connection, outbox) = hub.open_connection();
        let id = hub.register(connection).unwrap();

        let entered = Arc::new(tokio::sync::Notify::new());
        let options = SessionOptions {
            handler: Some(Arc::new(StalledHandler(Arc::clone(&entered)))),
            ..SessionOptions::default()
        };
        let frames = stream::iter(vec![Ok::<_, TransportError>(Message::Text("hi".into()))])
            .chain(stream::pending());

        let written = Arc::new(Mutex::new(Vec::new()));
        let session = tokio::spawn(run_session(
            Arc::clone(&hub),
            outbox,
            recording_sink(Arc::clone(&written)),
            frames,
            options,
        ));

        tokio::time::timeout(Duration::from_secs(2), entered.notified())
            .await
            .unwrap();
        hub.unregister(id);

        let (inbound, outbound) = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inbound, PumpExit::Cancelled);
        assert_eq!(outbound, PumpExit::QueueClosed);
    }
}
