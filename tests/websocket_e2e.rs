//! End-to-end tests over a real socket
//!
//! Each test starts the full router on an ephemeral port and talks to it
//! with a tokio-tungstenite client.

use futures_util::{SinkExt, StreamExt};
use pulsecast::api::{serve_on, AppState};
use pulsecast::config::ApiConfig;
use pulsecast::websocket::{Hub, HubConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: HubConfig) -> (Arc<Hub>, String) {
    let hub = Arc::new(Hub::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = AppState::new(Arc::clone(&hub), ApiConfig::default());
    tokio::spawn(serve_on(listener, state, std::future::pending()));

    (hub, format!("ws://{}/ws", addr))
}

async fn connect(url: &str) -> Client {
    let (client, _response) = connect_async(url).await.unwrap();
    client
}

async fn wait_for_connections(hub: &Hub, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hub never reached the expected connection count");
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .expect("read failed");

        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (hub, url) = start_server(HubConfig::default()).await;
    let mut first = connect(&url).await;
    let mut second = connect(&url).await;
    wait_for_connections(&hub, 2).await;

    let report = hub.publish("dashboard_update", json!({"active_users": 1337}));
    assert_eq!(report.delivered, 2);

    for client in [&mut first, &mut second] {
        let event = next_event(client).await;
        assert_eq!(event, json!({"type": "dashboard_update", "data": {"active_users": 1337}}));
    }
}

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    let (hub, url) = start_server(HubConfig::default()).await;
    let mut client = connect(&url).await;
    wait_for_connections(&hub, 1).await;

    for seq in 0..20 {
        hub.publish("tick", json!({ "seq": seq }));
    }

    for expected in 0..20 {
        let event = next_event(&mut client).await;
        assert_eq!(event["data"]["seq"], expected);
    }
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let (hub, url) = start_server(HubConfig::default()).await;
    let mut client = connect(&url).await;
    wait_for_connections(&hub, 1).await;

    client.close(None).await.unwrap();

    wait_for_connections(&hub, 0).await;
    assert_eq!(hub.stats().unregistered_total, 1);
}

#[tokio::test]
async fn test_client_messages_are_ignored() {
    let (hub, url) = start_server(HubConfig::default()).await;
    let mut client = connect(&url).await;
    wait_for_connections(&hub, 1).await;

    client.send(Message::Text("hello hub".into())).await.unwrap();
    hub.publish("still_here", Value::Null);

    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "still_here");
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_connection_over_limit_is_refused() {
    let (hub, url) = start_server(HubConfig {
        max_connections: Some(1),
        ..HubConfig::default()
    })
    .await;
    let _admitted = connect(&url).await;
    wait_for_connections(&hub, 1).await;

    let mut refused = connect(&url).await;
    let message = tokio::time::timeout(Duration::from_secs(5), refused.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Again),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_idle_client_is_disconnected() {
    let (hub, url) = start_server(HubConfig {
        idle_timeout: Some(Duration::from_millis(200)),
        ..HubConfig::default()
    })
    .await;
    let _client = connect(&url).await;
    wait_for_connections(&hub, 1).await;

    wait_for_connections(&hub, 0).await;
}
