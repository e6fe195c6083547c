//! Delivery of server events to clients, locally and across the fleet.
//!
//! The `to_*` functions deliver to the matching connections this node holds and publish
//! a fleet event so other nodes deliver to theirs. The `local_*` functions are what
//! inbound fleet events use and never publish.

use axum::extract::ws::Message;

use super::events::ServerEvent;
use super::ConnectionSender;
use crate::call::signaling;
use crate::fabric::FleetEvent;
use crate::session::{ConnectionId, Identity, Locator};
use crate::state::AppState;

/// Serialize and queue one event on a connection's channel.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) -> bool {
    match event.to_json() {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            false
        }
    }
}

/// Deliver to one local connection. Returns false if the connection is gone.
///
/// Call notifications are observed on the way out so this node's view of the
/// recipient's calls follows what the recipient is told.
pub fn to_connection(state: &AppState, connection: ConnectionId, event: &ServerEvent) -> bool {
    let Some(tx) = state.connections.get(&connection).map(|c| c.value().clone()) else {
        return false;
    };
    if let Some(identity) = state.sessions.identity(connection) {
        signaling::observe_delivery(state, &identity, event);
    }
    send_event(&tx, event)
}

/// Deliver to whichever node holds `locator`.
pub fn to_locator(state: &AppState, locator: &Locator, event: ServerEvent) {
    if locator.is_on(&state.node_id) {
        to_connection(state, locator.connection, &event);
    } else {
        state.fabric.publish(FleetEvent::DirectDeliver {
            locator: locator.clone(),
            event,
        });
    }
}

/// Deliver to the current connection of `user`, wherever it is.
/// Returns false if the user has no presence entry.
pub fn to_user(state: &AppState, user: &Identity, event: ServerEvent) -> bool {
    match state.presence.lookup(user) {
        Some(entry) => {
            to_locator(state, &entry.locator, event);
            true
        }
        None => false,
    }
}

/// Deliver to every local connection bound to `room`.
pub fn local_room(state: &AppState, room: &str, event: &ServerEvent, except: Option<ConnectionId>) {
    for (connection, binding) in state.sessions.bindings() {
        if binding.room.as_deref() == Some(room) && Some(connection) != except {
            to_connection(state, connection, event);
        }
    }
}

/// Deliver to every member of `room` across the fleet.
///
/// Callers that need ordering against joins hold the room gate while calling this.
pub fn to_room(state: &AppState, room: &str, event: ServerEvent, except: Option<ConnectionId>) {
    local_room(state, room, &event, except);
    state.fabric.publish(FleetEvent::RoomDeliver {
        room: room.to_string(),
        event,
        except,
    });
}

/// Deliver to every local connection.
pub fn local_all(state: &AppState, event: &ServerEvent) {
    let senders: Vec<ConnectionSender> = state
        .connections
        .iter()
        .map(|c| c.value().clone())
        .collect();
    for tx in senders {
        send_event(&tx, event);
    }
}
