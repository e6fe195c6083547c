//! Consumer of fleet events published by other nodes.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{envelope, FleetEvent, TransportEvent};
use crate::error::FabricError;
use crate::rooms::handlers::refresh_listing;
use crate::state::AppState;
use crate::store;
use crate::ws::broadcast::{local_room, to_connection};

/// Subscribe to the transport and apply inbound events until it closes.
pub fn spawn(state: AppState) -> Result<JoinHandle<()>, FabricError> {
    let rx = state.fabric.subscribe()?;
    Ok(tokio::spawn(run_inbound(state, rx)))
}

pub async fn run_inbound(state: AppState, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    tracing::info!(node = %state.node_id, transport = state.fabric.transport_name(), "Fleet consumer started");
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                let (header, event) = match envelope::decode(&frame) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = frame.len(), "Dropping undecodable fleet frame");
                        continue;
                    }
                };
                if header.origin == state.node_id.as_str() {
                    continue;
                }
                tracing::trace!(
                    origin = %header.origin,
                    sequence = header.sequence,
                    kind = event.kind(),
                    "Fleet event received"
                );
                apply(&state, event).await;
            }
            TransportEvent::PeerJoined(peer) => {
                tracing::info!(peer = %peer, "Fleet peer joined, requesting resync");
                state.fabric.publish(FleetEvent::Resync);
                republish(&state);
            }
        }
    }
    tracing::warn!(node = %state.node_id, "Fleet transport closed");
}

/// Apply one event published by another node.
pub async fn apply(state: &AppState, event: FleetEvent) {
    match event {
        FleetEvent::PresenceUp { identity, locator } => {
            state.presence.register(&identity, locator);
        }
        FleetEvent::PresenceDown { identity, locator } => {
            state.presence.remove(&identity, &locator);
        }
        FleetEvent::MemberJoined { room, member } => {
            state.rooms.join(&room, &member.identity, member.locator);
        }
        FleetEvent::MemberLeft { room, member } => {
            state.rooms.leave(&room, &member.identity, &member.locator);
        }
        FleetEvent::RoomDeliver { room, event, except } => {
            let gate = state.rooms.gate(&room);
            let _guard = gate.lock().await;
            local_room(state, &room, &event, except);
        }
        FleetEvent::DirectDeliver { locator, event } => {
            if locator.is_on(&state.node_id) {
                to_connection(state, locator.connection, &event);
            }
        }
        FleetEvent::ReactionSet { key, reactors } => {
            let applied = store::blocking(state.reactions.clone(), move |ledger| {
                Ok(ledger.apply_remote(key, &reactors))
            })
            .await;
            if let Ok(false) = applied {
                tracing::debug!("Ignoring stale reaction set");
            }
        }
        FleetEvent::RoomSummary { summary } => {
            state.directory.apply_remote(summary);
            refresh_listing(state).await;
        }
        FleetEvent::Resync => republish(state),
    }
}

/// Publish the presence, membership and room counts this node is authoritative for.
fn republish(state: &AppState) {
    let presence = state.presence.held_by(&state.node_id);
    let members = state.rooms.held_by(&state.node_id);
    let rooms = state.directory.known();
    tracing::debug!(
        presence = presence.len(),
        members = members.len(),
        rooms = rooms.len(),
        "Republishing local state"
    );

    for entry in presence {
        state.fabric.publish(FleetEvent::PresenceUp {
            identity: entry.identity,
            locator: entry.locator,
        });
    }
    for (room, member) in members {
        state.fabric.publish(FleetEvent::MemberJoined { room, member });
    }
    for summary in rooms {
        state.fabric.publish(FleetEvent::RoomSummary { summary });
    }
}
