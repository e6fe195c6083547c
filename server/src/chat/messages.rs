//! Room message and reaction handlers.

use crate::chat::message::{ChannelId, ChatMessage, MessageBody};
use crate::chat::reactions::{ReactionChange, ReactionKey, ReactionSummary};
use crate::error::{HandlerError, StoreError};
use crate::fabric::FleetEvent;
use crate::rooms::handlers::room_binding;
use crate::session::{ConnectionId, Identity};
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::to_room;
use crate::ws::events::{FileAttachment, ServerEvent, VoiceNote};

impl From<VoiceNote> for MessageBody {
    fn from(v: VoiceNote) -> Self {
        MessageBody::Voice {
            audio: v.audio,
            duration: v.duration,
            mime_type: v.mime_type,
        }
    }
}

impl From<FileAttachment> for MessageBody {
    fn from(f: FileAttachment) -> Self {
        MessageBody::File {
            url: f.url,
            name: f.name,
            size: f.size,
            mime_type: f.mime_type,
        }
    }
}

/// `chat:send`, `chat:send:voice`, `chat:send:file`: persist, then fan out to the room.
///
/// Append and fan-out happen under the room gate, so every member sees room messages
/// in log order.
pub async fn send(state: &AppState, connection: ConnectionId, body: MessageBody) -> Result<(), HandlerError> {
    let (user, room) = room_binding(state, connection)?;
    let kind = body.kind();
    let message = ChatMessage::in_room(&room, user.name(), body);

    let gate = state.rooms.gate(&room);
    let _guard = gate.lock().await;
    let stored = store::blocking(state.history.clone(), move |s| s.append(message)).await?;
    let id = stored.id.clone();
    to_room(state, &room, ServerEvent::ChatMessage(stored), None);

    tracing::debug!(user = %user, room = %room, message_id = %id, kind, "Room message");
    Ok(())
}

/// `chat:react`: toggle the sender's reaction and show the new reactor set to the room.
pub async fn react(
    state: &AppState,
    connection: ConnectionId,
    message_id: String,
    emoji: String,
) -> Result<(), HandlerError> {
    let (user, room) = room_binding(state, connection)?;
    let key = ReactionKey::new(ChannelId::room(&room), message_id.clone(), emoji.clone());
    let change = toggle_persisted(state, key, user.clone()).await?;

    to_room(
        state,
        &room,
        ServerEvent::ChatReaction {
            message_id,
            emoji,
            user: user.name().to_string(),
            users: change.reactors.users,
        },
        None,
    );
    Ok(())
}

/// Toggle `user` on `key`, persisting the result before the ledger changes, then
/// publish the new set to the fleet. Shared by room and DM reactions.
pub async fn toggle_persisted(
    state: &AppState,
    key: ReactionKey,
    user: Identity,
) -> Result<ReactionChange, StoreError> {
    let history = state.history.clone();
    let change = store::blocking(state.reactions.clone(), move |ledger| {
        ledger.toggle_with(key, &user, |k, reactors| history.save_reactors(k, reactors))
    })
    .await?;

    state.fabric.publish(FleetEvent::ReactionSet {
        key: change.key.clone(),
        reactors: change.reactors.clone(),
    });
    tracing::debug!(
        channel = %change.key.channel,
        message_id = %change.key.message_id,
        emoji = %change.key.emoji,
        added = change.added,
        "Reaction toggled"
    );
    Ok(change)
}

/// Reactions of `channel` for overlay onto its replayed history.
pub async fn overlay(state: &AppState, channel: ChannelId) -> Result<Vec<ReactionSummary>, StoreError> {
    store::blocking(state.reactions.clone(), move |ledger| Ok(ledger.snapshot(&channel))).await
}
