//! Dispatch of decoded client events to their handlers.

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::call::signaling;
use crate::chat;
use crate::dm;
use crate::error::HandlerError;
use crate::rooms::handlers as rooms;
use crate::session::{lifecycle, ConnectionId};
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::events::{self, ClientEvent, ServerEvent};

/// Handle one text frame. Failures are reported to the sender as an `error` event;
/// nothing is changed for a frame that fails to decode.
pub async fn handle_text(
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    connection: ConnectionId,
) {
    let event = match events::decode(text, state.settings.max_attachment_bytes) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection_id = %connection, error = %e, "Rejected client frame");
            send_error(tx, e.code(), e.to_string());
            return;
        }
    };

    let name = event.name();
    if let Err(e) = dispatch(state, connection, event).await {
        match &e {
            HandlerError::Store(_) => {
                tracing::error!(connection_id = %connection, event = name, error = %e, "Handler failed")
            }
            _ => tracing::debug!(connection_id = %connection, event = name, error = %e, "Handler refused event"),
        }
        send_error(tx, e.code(), e.to_string());
    }
}

async fn dispatch(state: &AppState, connection: ConnectionId, event: ClientEvent) -> Result<(), HandlerError> {
    match event {
        ClientEvent::UserOnline { user } => lifecycle::announce(state, connection, user).await,
        ClientEvent::RoomJoin { room, user } => rooms::join(state, connection, room, user).await,
        ClientEvent::RoomLeave => rooms::leave(state, connection).await,
        ClientEvent::ChatSend { text } => {
            chat::messages::send(state, connection, chat::message::MessageBody::Text { text }).await
        }
        ClientEvent::ChatSendVoice(voice) => chat::messages::send(state, connection, voice.into()).await,
        ClientEvent::ChatSendFile(file) => chat::messages::send(state, connection, file.into()).await,
        ClientEvent::ChatReact { message_id, emoji } => {
            chat::messages::react(state, connection, message_id, emoji).await
        }
        ClientEvent::ChatTyping { is_typing } => rooms::typing(state, connection, is_typing),
        ClientEvent::PresenceMute { muted } => rooms::mute(state, connection, muted),
        ClientEvent::DmHistory { to } => dm::messages::history(state, connection, to).await,
        ClientEvent::DmSend { to, text } => {
            dm::messages::send(state, connection, to, chat::message::MessageBody::Text { text }).await
        }
        ClientEvent::DmSendVoice { to, voice } => dm::messages::send(state, connection, to, voice.into()).await,
        ClientEvent::DmSendFile { to, file } => dm::messages::send(state, connection, to, file.into()).await,
        ClientEvent::DmReact { to, message_id, emoji } => {
            dm::messages::react(state, connection, to, message_id, emoji).await
        }
        ClientEvent::CallRequest { to } => signaling::request(state, connection, to).await,
        ClientEvent::CallAccept { to } => signaling::accept(state, connection, to).await,
        ClientEvent::CallReject { to } => signaling::reject(state, connection, to).await,
        ClientEvent::CallEnd { to } => signaling::end(state, connection, to).await,
        ClientEvent::WebrtcOffer { to, offer } => {
            signaling::relay(state, connection, to, |from| signaling::offer(from, offer))
        }
        ClientEvent::WebrtcAnswer { to, answer } => {
            signaling::relay(state, connection, to, |from| signaling::answer(from, answer))
        }
        ClientEvent::WebrtcIce { to, candidate } => {
            signaling::relay(state, connection, to, |from| signaling::ice(from, candidate))
        }
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, code: u16, message: String) {
    send_event(tx, &ServerEvent::error(code, message));
}
