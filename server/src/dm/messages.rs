//! Direct-message handlers: history, send (text, voice, file) and reactions.
//!
//! DMs to an offline user are stored and show up in their `dm:history`; nothing is
//! queued for live delivery.

use crate::chat::message::{ChannelId, ChatMessage, MessageBody};
use crate::chat::messages::toggle_persisted;
use crate::chat::reactions::ReactionKey;
use crate::error::{HandlerError, ValidationError};
use crate::session::lifecycle::identified;
use crate::session::{ConnectionId, Identity};
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::{to_connection, to_user};
use crate::ws::events::ServerEvent;

fn sender(state: &AppState, connection: ConnectionId, to: &Identity) -> Result<Identity, ValidationError> {
    let me = identified(state, connection)?;
    if &me == to {
        return Err(ValidationError::SelfAddressed);
    }
    Ok(me)
}

/// `dm:history`: the retained log of the pair plus its reactions.
pub async fn history(state: &AppState, connection: ConnectionId, to: Identity) -> Result<(), HandlerError> {
    let me = sender(state, connection, &to)?;
    let channel = ChannelId::dm(&me, &to);
    let lookup = channel.clone();
    let history = store::blocking(state.history.clone(), move |s| s.history(&lookup)).await?;
    let reactions = crate::chat::messages::overlay(state, channel).await?;

    to_connection(
        state,
        connection,
        &ServerEvent::DmHistory {
            dm_id: super::channel_id(&me, &to),
            history,
            reactions,
        },
    );
    Ok(())
}

/// `dm:send*`: persist, echo to the sending connection, deliver to the recipient.
pub async fn send(
    state: &AppState,
    connection: ConnectionId,
    to: Identity,
    body: MessageBody,
) -> Result<(), HandlerError> {
    let me = sender(state, connection, &to)?;
    let kind = body.kind();
    let message = ChatMessage::in_dm(&me, &to, body);
    let stored = store::blocking(state.history.clone(), move |s| s.append(message)).await?;
    let id = stored.id.clone();

    to_connection(state, connection, &ServerEvent::DmMessage(stored.clone()));
    let delivered = to_user(state, &to, ServerEvent::DmMessage(stored));

    tracing::debug!(from = %me, to = %to, message_id = %id, kind, delivered, "Direct message");
    Ok(())
}

/// `dm:react`: toggle a reaction on a DM and show the result to both participants.
pub async fn react(
    state: &AppState,
    connection: ConnectionId,
    to: Identity,
    message_id: String,
    emoji: String,
) -> Result<(), HandlerError> {
    let me = sender(state, connection, &to)?;
    let key = ReactionKey::new(ChannelId::dm(&me, &to), message_id.clone(), emoji.clone());
    let change = toggle_persisted(state, key, me.clone()).await?;

    let event = ServerEvent::DmReaction {
        dm_id: super::channel_id(&me, &to),
        message_id,
        emoji,
        user: me.name().to_string(),
        users: change.reactors.users,
    };
    to_connection(state, connection, &event);
    to_user(state, &to, event);
    Ok(())
}
