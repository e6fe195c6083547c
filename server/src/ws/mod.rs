pub mod actor;
pub mod broadcast;
pub mod events;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::ConnectionId;

/// Sender half of a connection's outbound channel.
/// Any part of the system can clone this to push frames to one client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Live WebSocket connections held by this node.
pub type ConnectionRegistry = Arc<DashMap<ConnectionId, ConnectionSender>>;

pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
