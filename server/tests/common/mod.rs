//! Shared harness: real routers on ephemeral ports, driven by WebSocket clients.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chorus_server::config::Settings;
use chorus_server::fabric::{inbound, Fabric, LocalBus};
use chorus_server::session::NodeId;
use chorus_server::state::AppState;
use chorus_server::store::MemoryStore;

/// How long `expect` waits for an event before failing.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestNode {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestNode {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a standalone node with its own bus and store.
pub async fn start_node() -> TestNode {
    start_fleet_node("solo", &LocalBus::default(), Arc::new(MemoryStore::default()), Settings::default()).await
}

/// Start one node of an in-process fleet. Nodes sharing `bus` and `store` behave
/// like separate processes behind one load balancer.
pub async fn start_fleet_node(
    id: &str,
    bus: &LocalBus,
    store: Arc<MemoryStore>,
    settings: Settings,
) -> TestNode {
    let node = NodeId::new(id);
    let fabric = Fabric::new(node.clone(), Arc::new(bus.clone()));
    let state = AppState::new(node, store.clone(), store, fabric, settings);
    inbound::spawn(state.clone()).expect("subscribe to bus");

    let app = chorus_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestNode { addr, state }
}

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    /// Connect and consume the initial `rooms:list`.
    pub async fn connect(node: &TestNode) -> Client {
        let url = format!("ws://{}/ws", node.addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("WebSocket connect failed");
        let mut client = Client { ws };
        client.expect("rooms:list").await;
        client
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.ws.send(Message::Text(frame.into())).await.unwrap();
    }

    pub async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.unwrap();
    }

    /// Next frame of any kind, or None on timeout.
    pub async fn next_event(&mut self, wait: Duration) -> Option<Value> {
        loop {
            match tokio::time::timeout(wait, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    /// Skip frames until `event` arrives and return it.
    pub async fn expect(&mut self, event: &str) -> Value {
        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(left).await {
                Some(frame) if frame["event"] == event => return frame,
                Some(_) => continue,
                None => panic!("timed out waiting for {event}"),
            }
        }
    }

    /// Assert that `event` does not arrive within `wait`.
    pub async fn expect_none(&mut self, event: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return;
            }
            match self.next_event(left).await {
                Some(frame) if frame["event"] == event => panic!("unexpected {event}: {frame}"),
                Some(_) => continue,
                None => return,
            }
        }
    }

    pub async fn online(&mut self, name: &str) {
        self.send("user:online", json!({ "name": name })).await;
    }

    /// Join and return the `room:users` snapshot sent to this client.
    pub async fn join(&mut self, room: &str, name: &str) -> Value {
        self.send("room:join", json!({ "roomId": room, "user": { "name": name } }))
            .await;
        self.expect("room:users").await
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Names in a `room:users` frame.
pub fn user_names(frame: &Value) -> Vec<String> {
    frame["data"]["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap().to_string())
        .collect()
}

/// Give fire-and-forget work (fleet delivery, teardown) time to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
