//! Call event handlers and WebRTC negotiation relay.
//!
//! The node that handles a request advances its own view of the session, then
//! notifies the peer. The peer's node advances its view when it delivers that
//! notification ([`observe_delivery`]), so both sides converge without sharing a
//! ledger.

use chrono::Utc;
use serde_json::Value;

use super::{CallDirection, CallOutcome, CallRecord, CallSession, CallSignal, CallState};
use crate::chat::message::{ChatMessage, MessageBody};
use crate::error::{CallError, HandlerError, ValidationError};
use crate::session::lifecycle::identified;
use crate::session::{ConnectionId, Identity};
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::{to_connection, to_user};
use crate::ws::events::ServerEvent;

fn caller_and_self(
    state: &AppState,
    connection: ConnectionId,
    to: &Identity,
) -> Result<Identity, ValidationError> {
    let me = identified(state, connection)?;
    if &me == to {
        return Err(ValidationError::SelfAddressed);
    }
    Ok(me)
}

/// `call:request`: start ringing `to`, or report it unavailable.
pub async fn request(state: &AppState, connection: ConnectionId, to: Identity) -> Result<(), HandlerError> {
    let me = caller_and_self(state, connection, &to)?;

    if state.presence.lookup(&to).is_none() {
        tracing::debug!(caller = %me, callee = %to, "Callee offline");
        to_connection(
            state,
            connection,
            &ServerEvent::CallUnavailable {
                to: to.name().to_string(),
            },
        );
        return Ok(());
    }

    let session = state.calls.request(&me, &to)?;
    to_user(
        state,
        &to,
        ServerEvent::CallIncoming {
            from: me.name().to_string(),
        },
    );
    spawn_ring_timeout(state, &session);

    tracing::info!(caller = %me, callee = %to, attempt = %session.attempt, "Call requested");
    Ok(())
}

/// `call:accept` from the callee.
pub async fn accept(state: &AppState, connection: ConnectionId, to: Identity) -> Result<(), HandlerError> {
    let me = caller_and_self(state, connection, &to)?;
    let pending = state
        .calls
        .get(&me, &to)
        .filter(|s| s.callee == me)
        .ok_or_else(|| CallError::NoSession(to.name().to_string()))?;
    let session = state.calls.apply(&pending.caller, &me, CallSignal::Accept)?;

    let delivered = to_user(
        state,
        &to,
        ServerEvent::CallAccepted {
            from: me.name().to_string(),
        },
    );
    if !delivered {
        state.calls.discard(&me, &to);
        return Err(CallError::Unavailable(to.name().to_string()).into());
    }
    to_connection(
        state,
        connection,
        &ServerEvent::CallAccepted {
            from: to.name().to_string(),
        },
    );

    tracing::info!(caller = %session.caller, callee = %me, "Call accepted");
    Ok(())
}

/// `call:reject` from the callee.
pub async fn reject(state: &AppState, connection: ConnectionId, to: Identity) -> Result<(), HandlerError> {
    let me = caller_and_self(state, connection, &to)?;
    decline(state, &me, &to).await
}

async fn decline(state: &AppState, me: &Identity, caller: &Identity) -> Result<(), HandlerError> {
    let session = state
        .calls
        .get(me, caller)
        .filter(|s| &s.callee == me)
        .ok_or_else(|| CallError::NoSession(caller.name().to_string()))?;
    let session = state.calls.apply(&session.caller, me, CallSignal::Reject)?;

    to_user(
        state,
        caller,
        ServerEvent::CallRejected {
            from: me.name().to_string(),
        },
    );
    write_call_log(state, &session, me, CallOutcome::Rejected).await;

    tracing::info!(caller = %caller, callee = %me, "Call rejected");
    Ok(())
}

/// `call:end`: hang up an established call, or give up on a pending one.
pub async fn end(state: &AppState, connection: ConnectionId, to: Identity) -> Result<(), HandlerError> {
    let me = caller_and_self(state, connection, &to)?;
    let session = state
        .calls
        .get(&me, &to)
        .ok_or_else(|| CallError::NoSession(to.name().to_string()))?;

    match session.state {
        CallState::InCall => {
            let ended = state.calls.apply(&me, &to, CallSignal::End)?;
            to_user(
                state,
                &to,
                ServerEvent::CallEnded {
                    from: me.name().to_string(),
                },
            );
            write_call_log(state, &ended, &me, CallOutcome::Ended).await;
            tracing::info!(user = %me, peer = %to, seconds = ended.talk_seconds(), "Call ended");
        }
        state_now if state_now.is_pending() && session.caller == me => {
            let cancelled = state.calls.apply(&me, &to, CallSignal::Cancel)?;
            to_user(
                state,
                &to,
                ServerEvent::CallMissed {
                    from: me.name().to_string(),
                },
            );
            write_call_log(state, &cancelled, &me, CallOutcome::Missed).await;
            tracing::info!(caller = %me, callee = %to, "Call cancelled");
        }
        state_now if state_now.is_pending() => {
            decline(state, &me, &to).await?;
        }
        other => {
            return Err(CallError::InvalidTransition {
                state: other.as_str(),
                signal: CallSignal::End.as_str(),
            }
            .into())
        }
    }
    Ok(())
}

/// Release every call `user` takes part in (disconnect or leave).
pub async fn hang_up_all(state: &AppState, user: &Identity) {
    for session in state.calls.sessions_of(user) {
        let peer = session.peer_of(user).clone();
        if state.calls.discard(user, &peer).is_none() {
            continue;
        }
        let from = user.name().to_string();
        match session.state {
            CallState::InCall => {
                to_user(state, &peer, ServerEvent::CallEnded { from });
                write_call_log(state, &session, user, CallOutcome::Ended).await;
            }
            s if s.is_pending() && &session.caller == user => {
                to_user(state, &peer, ServerEvent::CallMissed { from });
                write_call_log(state, &session, user, CallOutcome::Missed).await;
            }
            _ => {
                to_user(state, &peer, ServerEvent::CallEnded { from });
            }
        }
        tracing::info!(user = %user, peer = %peer, state = session.state.as_str(), "Call dropped with session");
    }
}

/// Forward a WebRTC offer, answer or ICE candidate to `to`. Dropped silently if
/// `to` is offline.
pub fn relay<F>(state: &AppState, connection: ConnectionId, to: Identity, make: F) -> Result<(), HandlerError>
where
    F: FnOnce(String) -> ServerEvent,
{
    let me = identified(state, connection)?;
    if !to_user(state, &to, make(me.name().to_string())) {
        tracing::debug!(from = %me, to = %to, "Relay target offline");
    }
    Ok(())
}

pub fn offer(from: String, offer: Value) -> ServerEvent {
    ServerEvent::WebrtcOffer { from, offer }
}

pub fn answer(from: String, answer: Value) -> ServerEvent {
    ServerEvent::WebrtcAnswer { from, answer }
}

pub fn ice(from: String, candidate: Value) -> ServerEvent {
    ServerEvent::WebrtcIce { from, candidate }
}

/// Advance this node's view of `recipient`'s calls as a call notification is
/// delivered to it.
pub fn observe_delivery(state: &AppState, recipient: &Identity, event: &ServerEvent) {
    let (from, signal) = match event {
        ServerEvent::CallIncoming { from } => (from, CallSignal::Ring),
        ServerEvent::CallRinging { from } => (from, CallSignal::Ring),
        ServerEvent::CallAccepted { from } => (from, CallSignal::Accept),
        ServerEvent::CallRejected { from }
        | ServerEvent::CallEnded { from }
        | ServerEvent::CallMissed { from } => {
            if let Ok(peer) = Identity::parse(from) {
                state.calls.discard(recipient, &peer);
            }
            return;
        }
        _ => return,
    };
    let Ok(peer) = Identity::parse(from) else {
        return;
    };

    if let ServerEvent::CallIncoming { .. } = event {
        ringing(state, &peer, recipient);
        return;
    }
    if let Err(e) = state.calls.apply(recipient, &peer, signal) {
        tracing::debug!(user = %recipient, peer = %peer, error = %e, "Ignoring call notification");
    }
}

/// The callee has been told about an incoming call: track it and tell the caller.
fn ringing(state: &AppState, caller: &Identity, callee: &Identity) {
    match state.calls.ring(caller, callee) {
        Ok((session, created)) => {
            if created {
                spawn_stale_cleanup(state, &session);
            }
            to_user(
                state,
                caller,
                ServerEvent::CallRinging {
                    from: callee.name().to_string(),
                },
            );
        }
        Err(e) => tracing::debug!(caller = %caller, callee = %callee, error = %e, "Ignoring incoming call"),
    }
}

/// After the ring timeout an unanswered attempt is missed for both parties.
fn spawn_ring_timeout(state: &AppState, session: &CallSession) {
    let state = state.clone();
    let caller = session.caller.clone();
    let callee = session.callee.clone();
    let attempt = session.attempt;
    let timeout = state.settings.ring_timeout;

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(expired) = state.calls.expire(&caller, &callee, attempt) else {
            return;
        };
        to_user(
            &state,
            &caller,
            ServerEvent::CallMissed {
                from: callee.name().to_string(),
            },
        );
        to_user(
            &state,
            &callee,
            ServerEvent::CallMissed {
                from: caller.name().to_string(),
            },
        );
        write_call_log(&state, &expired, &caller, CallOutcome::Missed).await;
        tracing::info!(caller = %caller, callee = %callee, "Call not answered");
    });
}

/// Drop a callee-side view whose caller's node never reported the outcome.
fn spawn_stale_cleanup(state: &AppState, session: &CallSession) {
    let calls = state.calls.clone();
    let caller = session.caller.clone();
    let callee = session.callee.clone();
    let attempt = session.attempt;
    let after = state.settings.ring_timeout + state.settings.ring_grace;

    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if calls.expire(&caller, &callee, attempt).is_some() {
            tracing::debug!(caller = %caller, callee = %callee, "Discarded stale incoming call");
        }
    });
}

/// Record the outcome of `session` in the pair's DM log and show it to both parties.
///
/// `author` is whoever's action ended the call; the record's direction is relative
/// to them.
async fn write_call_log(state: &AppState, session: &CallSession, author: &Identity, kind: CallOutcome) {
    let direction = if &session.caller == author {
        CallDirection::Outgoing
    } else {
        CallDirection::Incoming
    };
    let record = CallRecord {
        kind,
        direction,
        caller: session.caller.name().to_string(),
        callee: session.callee.name().to_string(),
        duration_secs: match kind {
            CallOutcome::Ended => session.talk_seconds(),
            _ => 0,
        },
        timestamp: Utc::now().timestamp_millis(),
    };
    let peer = session.peer_of(author).clone();
    let message = ChatMessage::in_dm(
        author,
        &peer,
        MessageBody::CallLog {
            text: record.render(),
            call: record,
        },
    );

    match store::blocking(state.history.clone(), move |s| s.append(message)).await {
        Ok(stored) => {
            to_user(state, author, ServerEvent::DmMessage(stored.clone()));
            to_user(state, &peer, ServerEvent::DmMessage(stored));
        }
        Err(e) => tracing::warn!(caller = %session.caller, callee = %session.callee, error = %e, "Failed to write call log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::ChannelId;
    use crate::config::Settings;
    use crate::state::testing::{drain, events, online, state, state_with};
    use crate::store::HistoryStore;
    use std::time::Duration;

    fn user(name: &str) -> Identity {
        Identity::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_request_rings_both_sides() {
        let state = state();
        let (alice, mut alice_rx) = online(&state, "Alice").await;
        let (_bob, mut bob_rx) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();

        assert_eq!(events(&mut bob_rx), vec!["call:incoming"]);
        let frames = drain(&mut alice_rx);
        assert_eq!(frames[0]["event"], "call:ringing");
        assert_eq!(frames[0]["data"]["from"], "Bob");
        let session = state.calls.get(&user("Alice"), &user("Bob")).unwrap();
        assert_eq!(session.state, CallState::Ringing);
    }

    #[tokio::test]
    async fn test_request_to_offline_user_is_unavailable() {
        let state = state();
        let (alice, mut alice_rx) = online(&state, "Alice").await;

        request(&state, alice, user("Bob")).await.unwrap();

        let frames = drain(&mut alice_rx);
        assert_eq!(frames[0]["event"], "call:unavailable");
        assert_eq!(frames[0]["data"]["to"], "Bob");
        assert!(state.calls.is_empty());
    }

    #[tokio::test]
    async fn test_second_request_for_same_pair_conflicts() {
        let state = state();
        let (alice, _a) = online(&state, "Alice").await;
        let (bob, _b) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        let err = request(&state, bob, user("Alice")).await.unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[tokio::test]
    async fn test_accept_then_end_logs_duration() {
        let state = state();
        let (alice, mut alice_rx) = online(&state, "Alice").await;
        let (bob, mut bob_rx) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        accept(&state, bob, user("Alice")).await.unwrap();
        assert_eq!(
            state.calls.get(&user("Alice"), &user("Bob")).unwrap().state,
            CallState::InCall
        );
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        end(&state, alice, user("Bob")).await.unwrap();
        assert!(state.calls.is_empty());

        let bob_frames = drain(&mut bob_rx);
        assert_eq!(bob_frames[0]["event"], "call:ended");
        assert_eq!(bob_frames[1]["event"], "dm:message");
        assert_eq!(bob_frames[1]["data"]["kind"], "call-log");
        assert_eq!(bob_frames[1]["data"]["call"]["kind"], "ended");
        assert_eq!(events(&mut alice_rx), vec!["dm:message"]);

        let log = state
            .history
            .history(&ChannelId::dm(&user("Alice"), &user("Bob")))
            .unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_only_callee_can_accept() {
        let state = state();
        let (alice, _a) = online(&state, "Alice").await;
        let (_bob, _b) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        let err = accept(&state, alice, user("Bob")).await.unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[tokio::test]
    async fn test_reject_notifies_caller_and_logs() {
        let state = state();
        let (alice, mut alice_rx) = online(&state, "Alice").await;
        let (bob, _b) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        drain(&mut alice_rx);
        reject(&state, bob, user("Alice")).await.unwrap();

        let frames = drain(&mut alice_rx);
        assert_eq!(frames[0]["event"], "call:rejected");
        assert_eq!(frames[1]["data"]["text"], "📞 Call rejected");
        assert!(state.calls.is_empty());
    }

    #[tokio::test]
    async fn test_caller_cancel_is_missed_for_callee() {
        let state = state();
        let (alice, _a) = online(&state, "Alice").await;
        let (_bob, mut bob_rx) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        drain(&mut bob_rx);
        end(&state, alice, user("Bob")).await.unwrap();

        let frames = drain(&mut bob_rx);
        assert_eq!(frames[0]["event"], "call:missed");
        assert_eq!(frames[1]["data"]["text"], "📞 Missed call (no answer)");
    }

    #[tokio::test]
    async fn test_ring_timeout_marks_call_missed() {
        let state = state_with(Settings {
            ring_timeout: Duration::from_millis(50),
            ..Settings::default()
        });
        let (alice, mut alice_rx) = online(&state, "Alice").await;
        let (_bob, mut bob_rx) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(state.calls.is_empty());
        assert_eq!(events(&mut alice_rx), vec!["call:missed", "dm:message"]);
        assert_eq!(events(&mut bob_rx), vec!["call:missed", "dm:message"]);
    }

    #[tokio::test]
    async fn test_hang_up_all_ends_live_call() {
        let state = state();
        let (alice, _a) = online(&state, "Alice").await;
        let (bob, mut bob_rx) = online(&state, "Bob").await;

        request(&state, alice, user("Bob")).await.unwrap();
        accept(&state, bob, user("Alice")).await.unwrap();
        drain(&mut bob_rx);

        hang_up_all(&state, &user("Alice")).await;
        assert!(state.calls.is_empty());
        assert_eq!(events(&mut bob_rx), vec!["call:ended", "dm:message"]);
    }

    #[tokio::test]
    async fn test_relay_requires_identity_and_forwards() {
        let state = state();
        let (alice, _a) = online(&state, "Alice").await;
        let (_bob, mut bob_rx) = online(&state, "Bob").await;
        let (anonymous, _rx) = crate::state::testing::open(&state);

        assert!(relay(&state, anonymous, user("Bob"), |f| ice(f, Value::Null)).is_err());
        relay(&state, alice, user("Bob"), |f| offer(f, serde_json::json!({"sdp": "x"}))).unwrap();

        let frames = drain(&mut bob_rx);
        assert_eq!(frames[0]["event"], "webrtc:offer");
        assert_eq!(frames[0]["data"]["from"], "Alice");
        assert_eq!(frames[0]["data"]["offer"]["sdp"], "x");
    }
}
