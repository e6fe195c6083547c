//! Room events: join (including switching rooms), leave, typing and mute indicators.

use super::Member;
use crate::chat::message::{ChannelId, ChatMessage};
use crate::error::{HandlerError, StoreError, ValidationError};
use crate::fabric::FleetEvent;
use crate::session::lifecycle::{check_same_user, register_presence, teardown};
use crate::session::{ConnectionId, Identity, Locator};
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::{local_all, to_connection, to_room};
use crate::ws::events::{ServerEvent, UserRef};

/// The identity and room of a connection that has joined a room.
pub fn room_binding(
    state: &AppState,
    connection: ConnectionId,
) -> Result<(Identity, String), ValidationError> {
    let binding = state
        .sessions
        .binding(connection)
        .ok_or(ValidationError::NotJoined)?;
    let room = binding.room.ok_or(ValidationError::NotJoined)?;
    Ok((binding.identity, room))
}

fn snapshot(room: &str, members: &[Member]) -> ServerEvent {
    ServerEvent::RoomUsers {
        room_id: room.to_string(),
        users: members
            .iter()
            .map(|m| UserRef {
                name: m.identity.name().to_string(),
            })
            .collect(),
    }
}

async fn backlog(state: &AppState, room: &str) -> Result<ServerEvent, StoreError> {
    let channel = ChannelId::room(room);
    let lookup = channel.clone();
    let messages = store::blocking(state.history.clone(), move |s| s.history(&lookup)).await?;
    let reactions = crate::chat::messages::overlay(state, channel).await?;
    Ok(ServerEvent::ChatHistory {
        room_id: room.to_string(),
        messages,
        reactions,
    })
}

/// `room:join`: bind, register presence, add to membership, replay history, announce.
///
/// The room gate is held from the history read until the announcement is delivered,
/// so the joiner receives `room:users` and `chat:history` before any message sent
/// after its join. Store work for the new room happens before anything changes,
/// including leaving the previous room; a store failure leaves the connection
/// exactly as it was.
pub async fn join(
    state: &AppState,
    connection: ConnectionId,
    room: String,
    user: Identity,
) -> Result<(), HandlerError> {
    let current = check_same_user(state, connection, &user)?;
    let locator = Locator::new(state.node_id.clone(), connection);

    let previous = match current.and_then(|b| b.room) {
        Some(previous) if previous == room => {
            return resend_snapshot(state, connection, &room).await;
        }
        other => other,
    };

    let gate = state.rooms.gate(&room);
    let previous_gate = previous.as_deref().map(|p| state.rooms.gate(p));
    // Both gates are taken in room-id order; two connections switching between
    // the same rooms in opposite directions would otherwise deadlock.
    let (guard, previous_guard) = match (previous.as_deref(), previous_gate.as_ref()) {
        (Some(p), Some(other)) if p < room.as_str() => {
            let first = other.lock().await;
            (gate.lock().await, Some(first))
        }
        (_, Some(other)) => {
            let first = gate.lock().await;
            (first, Some(other.lock().await))
        }
        _ => (gate.lock().await, None),
    };

    let history = backlog(state, &room).await?;
    let announcement = ChatMessage::system(&room, format!("{} joined the room", user.name()));
    let announcement =
        store::blocking(state.history.clone(), move |s| s.append(announcement)).await?;

    state.sessions.bind(connection, user.clone(), Some(room.clone()));
    let departed = match previous {
        Some(previous) => {
            tracing::debug!(connection_id = %connection, from = %previous, to = %room, "Switching rooms");
            let remaining = remove_member(state, &user, &locator, &previous).await;
            remaining.map(|n| (previous, n))
        }
        None => None,
    };
    drop(previous_guard);

    register_presence(state, connection, &user);
    let members = state.rooms.join(&room, &user, locator.clone());
    state.fabric.publish(FleetEvent::MemberJoined {
        room: room.clone(),
        member: Member {
            identity: user.clone(),
            locator,
        },
    });

    to_room(state, &room, snapshot(&room, &members), None);
    to_connection(state, connection, &history);
    to_room(state, &room, ServerEvent::ChatMessage(announcement), None);
    drop(guard);

    tracing::info!(
        connection_id = %connection,
        user = %user,
        room = %room,
        members = members.len(),
        "Joined room"
    );
    if let Some((previous, remaining)) = departed {
        publish_count(state, &previous, remaining).await;
    }
    publish_count(state, &room, members.len()).await;
    Ok(())
}

async fn resend_snapshot(
    state: &AppState,
    connection: ConnectionId,
    room: &str,
) -> Result<(), HandlerError> {
    let gate = state.rooms.gate(room);
    let _guard = gate.lock().await;
    let history = backlog(state, room).await?;
    to_connection(state, connection, &snapshot(room, &state.rooms.members(room)));
    to_connection(state, connection, &history);
    Ok(())
}

/// Remove `user` at `locator` from `room` and announce it.
///
/// Leaving cannot fail: a disconnect has to release membership regardless, so a
/// store failure only loses the "left the room" line.
pub async fn depart(state: &AppState, user: &Identity, locator: &Locator, room: &str) {
    let gate = state.rooms.gate(room);
    let guard = gate.lock().await;
    let remaining = remove_member(state, user, locator, room).await;
    drop(guard);

    if let Some(remaining) = remaining {
        publish_count(state, room, remaining).await;
    }
}

/// Membership removal and its announcements. The caller holds the room gate.
/// Returns the number of members left, or `None` if `user` was not in the room.
async fn remove_member(state: &AppState, user: &Identity, locator: &Locator, room: &str) -> Option<usize> {
    let remaining = state.rooms.leave(room, user, locator)?;
    state.fabric.publish(FleetEvent::MemberLeft {
        room: room.to_string(),
        member: Member {
            identity: user.clone(),
            locator: locator.clone(),
        },
    });
    to_room(state, room, snapshot(room, &remaining), None);

    let announcement = ChatMessage::system(room, format!("{} left the room", user.name()));
    match store::blocking(state.history.clone(), move |s| s.append(announcement)).await {
        Ok(stored) => to_room(state, room, ServerEvent::ChatMessage(stored), None),
        Err(e) => tracing::warn!(room = %room, user = %user, error = %e, "Failed to log room departure"),
    }

    tracing::info!(user = %user, room = %room, members = remaining.len(), "Left room");
    Some(remaining.len())
}

/// `room:leave`: explicit teardown, acknowledged with `room:left`.
pub async fn leave(state: &AppState, connection: ConnectionId) -> Result<(), HandlerError> {
    let room = state.sessions.binding(connection).and_then(|b| b.room);
    teardown(state, connection).await;
    if let Some(room) = room {
        to_connection(state, connection, &ServerEvent::RoomLeft { room_id: room });
    }
    Ok(())
}

/// `chat:typing`: ephemeral, sent to everyone else in the room.
pub fn typing(state: &AppState, connection: ConnectionId, is_typing: bool) -> Result<(), HandlerError> {
    let (user, room) = room_binding(state, connection)?;
    to_room(
        state,
        &room,
        ServerEvent::Typing {
            user: user.name().to_string(),
            is_typing,
        },
        Some(connection),
    );
    Ok(())
}

/// `presence:mute`: microphone state shown to the rest of the room.
pub fn mute(state: &AppState, connection: ConnectionId, muted: bool) -> Result<(), HandlerError> {
    let (user, room) = room_binding(state, connection)?;
    to_room(
        state,
        &room,
        ServerEvent::Muted {
            user: user.name().to_string(),
            muted,
        },
        Some(connection),
    );
    Ok(())
}

pub async fn room_list(state: &AppState) -> Result<ServerEvent, StoreError> {
    let rooms = store::blocking(state.directory.clone(), |d| d.list()).await?;
    Ok(ServerEvent::RoomsList { rooms })
}

/// Persist the new participant count, tell the fleet and refresh local listings.
async fn publish_count(state: &AppState, room: &str, users: usize) {
    let room_id = room.to_string();
    match store::blocking(state.directory.clone(), move |d| d.set_count(&room_id, users)).await {
        Ok(summary) => {
            state.fabric.publish(FleetEvent::RoomSummary { summary });
            refresh_listing(state).await;
        }
        Err(e) => tracing::warn!(room = %room, error = %e, "Failed to update room count"),
    }
}

/// Send `rooms:list` to every local connection.
pub async fn refresh_listing(state: &AppState) {
    match room_list(state).await {
        Ok(event) => local_all(state, &event),
        Err(e) => tracing::warn!(error = %e, "Failed to load room list"),
    }
}
