//! Broadcast fabric: how nodes learn about connections they do not hold.
//!
//! Every node applies its own mutations locally and then publishes the *result* as a
//! [`FleetEvent`]. Other nodes apply those results to their replicas (presence,
//! membership, reactions, room counts) or deliver the carried client event to the
//! connections they physically hold. There is no acknowledgement or replay; a node that
//! misses an event stays divergent until the next resync.

pub mod bus;
pub mod config;
pub mod envelope;
pub mod gossip;
pub mod inbound;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::reactions::{ReactionKey, Reactors};
use crate::error::FabricError;
use crate::rooms::{Member, RoomSummary};
use crate::session::{ConnectionId, Identity, Locator, NodeId};
use crate::ws::events::ServerEvent;

pub use bus::LocalBus;

/// Replicated state change or delivery request published by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    PresenceUp {
        identity: Identity,
        locator: Locator,
    },
    PresenceDown {
        identity: Identity,
        locator: Locator,
    },
    MemberJoined {
        room: String,
        member: Member,
    },
    MemberLeft {
        room: String,
        member: Member,
    },
    /// Deliver `event` to every member of `room` held by the receiving node.
    RoomDeliver {
        room: String,
        event: ServerEvent,
        #[serde(default)]
        except: Option<ConnectionId>,
    },
    /// Deliver `event` to one connection, if the receiving node holds it.
    DirectDeliver {
        locator: Locator,
        event: ServerEvent,
    },
    ReactionSet {
        key: ReactionKey,
        reactors: Reactors,
    },
    RoomSummary {
        summary: RoomSummary,
    },
    /// Ask every node to republish the state it is authoritative for.
    Resync,
}

impl FleetEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PresenceUp { .. } => "presence_up",
            Self::PresenceDown { .. } => "presence_down",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::RoomDeliver { .. } => "room_deliver",
            Self::DirectDeliver { .. } => "direct_deliver",
            Self::ReactionSet { .. } => "reaction_set",
            Self::RoomSummary { .. } => "room_summary",
            Self::Resync => "resync",
        }
    }
}

/// What a transport hands to the inbound loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An encoded [`crate::proto::FleetEnvelope`].
    Frame(Vec<u8>),
    /// A new node became reachable; the fleet should resync.
    PeerJoined(String),
}

/// A publish/subscribe medium shared by all nodes.
pub trait FabricTransport: Send + Sync {
    fn publish(&self, frame: Vec<u8>) -> Result<(), FabricError>;

    /// Stream of inbound frames for this node. May only be taken once per transport handle.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, FabricError>;

    fn name(&self) -> &'static str;
}

/// Publishing handle shared through `AppState`.
#[derive(Clone)]
pub struct Fabric {
    node: NodeId,
    transport: Arc<dyn FabricTransport>,
    sequence: Arc<AtomicU64>,
}

impl Fabric {
    pub fn new(node: NodeId, transport: Arc<dyn FabricTransport>) -> Self {
        Self {
            node,
            transport,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, FabricError> {
        self.transport.subscribe()
    }

    /// Publish the result of a local mutation.
    ///
    /// Failures are logged, not returned: the local mutation has already happened and
    /// the fleet catches up on the next resync.
    pub fn publish(&self, event: FleetEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let kind = event.kind();
        let result = envelope::encode(self.node.as_str(), sequence, &event)
            .and_then(|frame| self.transport.publish(frame));
        match result {
            Ok(()) => tracing::trace!(node = %self.node, sequence, kind, "Fleet event published"),
            Err(e) => tracing::warn!(
                node = %self.node,
                sequence,
                kind,
                error = %e,
                "Failed to publish fleet event"
            ),
        }
    }
}
