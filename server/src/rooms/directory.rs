//! Room directory: named rooms and their participant counts, for listing.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::DirectoryStore;

/// One entry of the `rooms:list` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub users: usize,
}

impl RoomSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>, icon: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon,
            users: 0,
        }
    }
}

/// Store-backed directory with an overlay of counts published by other nodes.
///
/// When every node shares one store the overlay only mirrors what is persisted;
/// with per-node stores it is what makes remote rooms show up in listings.
pub struct RoomDirectory {
    store: Arc<dyn DirectoryStore>,
    overlay: DashMap<String, RoomSummary>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            overlay: DashMap::new(),
        }
    }

    /// Persist a new room.
    pub fn create(&self, room: RoomSummary) -> Result<RoomSummary, StoreError> {
        self.store.create_room(&room)?;
        self.overlay.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    /// Record the participant count of `room_id` after a local join or leave.
    pub fn set_count(&self, room_id: &str, users: usize) -> Result<RoomSummary, StoreError> {
        let summary = self.store.update_count(room_id, users)?;
        self.overlay.insert(summary.id.clone(), summary.clone());
        Ok(summary)
    }

    /// Apply a summary published by another node.
    pub fn apply_remote(&self, summary: RoomSummary) {
        self.overlay.insert(summary.id.clone(), summary);
    }

    /// Summaries this node has recorded or learned, for resync answers.
    pub fn known(&self) -> Vec<RoomSummary> {
        self.overlay.iter().map(|e| e.value().clone()).collect()
    }

    /// Persisted rooms in creation order with overlay counts applied, then
    /// rooms only known from the overlay.
    pub fn list(&self) -> Result<Vec<RoomSummary>, StoreError> {
        let mut rooms = self.store.list_rooms()?;
        for room in rooms.iter_mut() {
            if let Some(seen) = self.overlay.get(&room.id) {
                room.users = seen.users;
            }
        }
        let mut extra: Vec<RoomSummary> = self
            .overlay
            .iter()
            .filter(|e| !rooms.iter().any(|r| &r.id == e.key()))
            .map(|e| e.value().clone())
            .collect();
        extra.sort_by(|a, b| a.id.cmp(&b.id));
        rooms.extend(extra);
        Ok(rooms)
    }
}
