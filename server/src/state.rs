use std::sync::Arc;

use crate::call::CallLedger;
use crate::chat::reactions::ReactionLedger;
use crate::config::Settings;
use crate::fabric::Fabric;
use crate::rooms::{MembershipTable, RoomDirectory};
use crate::session::{NodeId, PresenceDirectory, SessionRegistry};
use crate::store::{DirectoryStore, HistoryStore};
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
///
/// Each table is owned here for the lifetime of the process; nothing is global.
#[derive(Clone)]
pub struct AppState {
    /// Id of this process in the fleet
    pub node_id: NodeId,
    /// Outbound channels of the WebSocket connections this node holds
    pub connections: ConnectionRegistry,
    /// Identity/room binding and teardown guard per local connection
    pub sessions: Arc<SessionRegistry>,
    /// Fleet-wide replica: user -> current connection locator
    pub presence: Arc<PresenceDirectory>,
    /// Fleet-wide replica: room -> members, plus per-room sequencing gates
    pub rooms: Arc<MembershipTable>,
    /// Named rooms and participant counts
    pub directory: Arc<RoomDirectory>,
    /// Room and DM message logs
    pub history: Arc<dyn HistoryStore>,
    /// (channel, message, emoji) -> reactors
    pub reactions: Arc<ReactionLedger>,
    /// This node's view of the calls its users take part in
    pub calls: Arc<CallLedger>,
    /// Publishing handle of the broadcast fabric
    pub fabric: Fabric,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        node_id: NodeId,
        history: Arc<dyn HistoryStore>,
        directory: Arc<dyn DirectoryStore>,
        fabric: Fabric,
        settings: Settings,
    ) -> Self {
        let reactions = Arc::new(ReactionLedger::new(node_id.as_str()));
        Self {
            node_id,
            connections: new_connection_registry(),
            sessions: Arc::new(SessionRegistry::new()),
            presence: Arc::new(PresenceDirectory::new()),
            rooms: Arc::new(MembershipTable::new()),
            directory: Arc::new(RoomDirectory::new(directory)),
            history,
            reactions,
            calls: Arc::new(CallLedger::new()),
            fabric,
            settings: Arc::new(settings),
        }
    }

    /// Load persisted reactions into the ledger.
    pub async fn hydrate(&self) -> Result<usize, crate::error::StoreError> {
        let rows = crate::store::blocking(self.history.clone(), |s| s.reactions()).await?;
        Ok(self.reactions.hydrate(rows))
    }
}
