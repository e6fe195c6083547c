use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{DirectoryStore, HistoryStore, DEFAULT_MAX_MESSAGES};
use crate::chat::message::{ChannelId, ChatMessage};
use crate::chat::reactions::{ReactionKey, Reactors};
use crate::error::StoreError;
use crate::rooms::directory::RoomSummary;

/// Process-local store for tests and ephemeral deployments.
///
/// Nodes that share one `Arc<MemoryStore>` behave like processes sharing a database.
#[derive(Debug)]
pub struct MemoryStore {
    logs: DashMap<ChannelId, VecDeque<ChatMessage>>,
    reactions: DashMap<ReactionKey, Reactors>,
    rooms: Mutex<Vec<RoomSummary>>,
    max_messages: usize,
}

impl MemoryStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            logs: DashMap::new(),
            reactions: DashMap::new(),
            rooms: Mutex::new(Vec::new()),
            max_messages: max_messages.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl HistoryStore for MemoryStore {
    fn append(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let mut log = self.logs.entry(message.channel()).or_default();
        log.push_back(message.clone());
        while log.len() > self.max_messages {
            log.pop_front();
        }
        Ok(message)
    }

    fn history(&self, channel: &ChannelId) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .logs
            .get(channel)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn save_reactors(&self, key: &ReactionKey, reactors: &Reactors) -> Result<(), StoreError> {
        let mut stored = self.reactions.entry(key.clone()).or_default();
        if reactors.version > stored.version {
            *stored = reactors.clone();
        }
        Ok(())
    }

    fn reactions(&self) -> Result<Vec<(ReactionKey, Reactors)>, StoreError> {
        Ok(self
            .reactions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}

impl DirectoryStore for MemoryStore {
    fn create_room(&self, room: &RoomSummary) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().map_err(|_| StoreError::Poisoned)?;
        if rooms.iter().any(|r| r.id == room.id) {
            return Err(StoreError::Duplicate(room.id.clone()));
        }
        rooms.push(room.clone());
        Ok(())
    }

    fn list_rooms(&self) -> Result<Vec<RoomSummary>, StoreError> {
        Ok(self.rooms.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn update_count(&self, room_id: &str, users: usize) -> Result<RoomSummary, StoreError> {
        let mut rooms = self.rooms.lock().map_err(|_| StoreError::Poisoned)?;
        match rooms.iter_mut().find(|r| r.id == room_id) {
            Some(room) => {
                room.users = users;
                Ok(room.clone())
            }
            None => {
                let mut room = RoomSummary::new(room_id, room_id, None);
                room.users = users;
                rooms.push(room.clone());
                Ok(room)
            }
        }
    }
}
