//! Connection lifecycle: announcing an identity, and releasing everything a
//! connection holds when it leaves or drops.

use super::{Binding, ConnectionId, Identity, Locator};
use crate::error::{HandlerError, ValidationError};
use crate::fabric::FleetEvent;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::events::ServerEvent;

/// The identity bound to `connection`, required by DM, call and relay events.
pub fn identified(state: &AppState, connection: ConnectionId) -> Result<Identity, ValidationError> {
    state
        .sessions
        .identity(connection)
        .ok_or(ValidationError::NotIdentified)
}

/// Refuse to rebind a connection to a different user.
pub fn check_same_user(
    state: &AppState,
    connection: ConnectionId,
    user: &Identity,
) -> Result<Option<Binding>, ValidationError> {
    match state.sessions.binding(connection) {
        Some(binding) if &binding.identity != user => Err(ValidationError::IdentityMismatch(
            binding.identity.name().to_string(),
        )),
        other => Ok(other),
    }
}

/// Point presence for `user` at `connection` (last registration wins) and tell the fleet.
pub fn register_presence(state: &AppState, connection: ConnectionId, user: &Identity) {
    let locator = Locator::new(state.node_id.clone(), connection);
    if let Some(previous) = state.presence.register(user, locator.clone()) {
        if previous.locator != locator {
            tracing::info!(
                user = %user,
                connection_id = %connection,
                superseded = %previous.locator.connection,
                "Presence moved to newer connection"
            );
        }
    }
    state.fabric.publish(FleetEvent::PresenceUp {
        identity: user.clone(),
        locator,
    });
}

/// `user:online`: bind the identity without joining a room.
pub async fn announce(
    state: &AppState,
    connection: ConnectionId,
    user: Identity,
) -> Result<(), HandlerError> {
    let current = check_same_user(state, connection, &user)?;
    let room = current.and_then(|b| b.room);
    state.sessions.bind(connection, user.clone(), room);
    register_presence(state, connection, &user);

    tracing::info!(connection_id = %connection, user = %user, "User online");
    Ok(())
}

/// Release presence, calls and room membership held by `connection`.
///
/// Both `room:leave` and the transport disconnect land here, in either order and
/// possibly concurrently; the session registry hands the binding to exactly one of
/// them, so the second call is a no-op and returns `None`.
pub async fn teardown(state: &AppState, connection: ConnectionId) -> Option<Binding> {
    let binding = state.sessions.mark_left_cleanly(connection)?;
    let locator = Locator::new(state.node_id.clone(), connection);

    // A superseded connection must not end calls of the connection that replaced it.
    let was_current = state.presence.remove(&binding.identity, &locator);
    if was_current {
        state.fabric.publish(FleetEvent::PresenceDown {
            identity: binding.identity.clone(),
            locator: locator.clone(),
        });
        crate::call::signaling::hang_up_all(state, &binding.identity).await;
    }

    if let Some(room) = &binding.room {
        crate::rooms::handlers::depart(state, &binding.identity, &locator, room).await;
    }

    tracing::info!(
        connection_id = %connection,
        user = %binding.identity,
        room = ?binding.room,
        "Session torn down"
    );
    Some(binding)
}

/// Send the current room listing to one connection.
pub async fn send_room_list(state: &AppState, connection: ConnectionId) {
    match crate::rooms::handlers::room_list(state).await {
        Ok(event) => {
            broadcast::to_connection(state, connection, &event);
        }
        Err(e) => {
            tracing::warn!(connection_id = %connection, error = %e, "Failed to load room list");
            broadcast::to_connection(state, connection, &ServerEvent::error(500, e.to_string()));
        }
    }
}
