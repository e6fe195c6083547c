use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::error::ProtocolError;
use crate::session::{lifecycle, ConnectionId};
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::events::ServerEvent;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes client events and runs their handlers one at a time,
///   so events from one connection are handled in the order they were sent
///
/// Teardown on exit goes through the same one-shot path as `room:leave`.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    state.connections.insert(connection, tx.clone());
    state.sessions.open(connection);
    tracing::info!(connection_id = %connection, node = %state.node_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    lifecycle::send_room_list(&state, connection).await;

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %connection, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text(text.as_str(), &tx, &state, connection).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(connection_id = %connection, bytes = data.len(), "Rejecting binary frame");
                    let err = ProtocolError::Binary;
                    send_event(&tx, &ServerEvent::error(err.code(), err.to_string()));
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(connection_id = %connection, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(connection_id = %connection, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(connection_id = %connection, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    // Release presence, calls and membership before the channel goes away.
    lifecycle::teardown(&state, connection).await;
    state.sessions.close(connection);
    state.connections.remove(&connection);
    writer_handle.abort();

    tracing::info!(connection_id = %connection, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
