//! Persistence contracts for message logs, reactions and the room directory.
//!
//! Both traits are synchronous; async callers go through [`blocking`], which runs the
//! closure on the blocking pool the same way every rusqlite call in this crate does.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::sync::Arc;

use crate::chat::message::{ChannelId, ChatMessage};
use crate::chat::reactions::{ReactionKey, Reactors};
use crate::error::StoreError;
use crate::rooms::directory::RoomSummary;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Default per-channel log bound.
pub const DEFAULT_MAX_MESSAGES: usize = 500;

/// Append-only message logs keyed by channel, plus persisted reaction sets.
pub trait HistoryStore: Send + Sync {
    /// Store `message` at the end of its channel's log and return it unchanged.
    ///
    /// The log is trimmed to the newest entries once it exceeds the configured bound.
    fn append(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;

    /// The whole retained log of `channel`, in append order.
    fn history(&self, channel: &ChannelId) -> Result<Vec<ChatMessage>, StoreError>;

    /// Persist the reactor set of `key` unless a newer version is already stored.
    /// A cleared set is kept as an empty row.
    fn save_reactors(&self, key: &ReactionKey, reactors: &Reactors) -> Result<(), StoreError>;

    /// Every persisted reactor set, cleared ones included (startup hydration).
    fn reactions(&self) -> Result<Vec<(ReactionKey, Reactors)>, StoreError>;
}

/// Listing of named rooms and their participant counts.
pub trait DirectoryStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] if the id is taken.
    fn create_room(&self, room: &RoomSummary) -> Result<(), StoreError>;

    fn list_rooms(&self) -> Result<Vec<RoomSummary>, StoreError>;

    /// Set the participant count of `room_id`, creating an entry named after the id
    /// for rooms that only exist because someone joined them.
    fn update_count(&self, room_id: &str, users: usize) -> Result<RoomSummary, StoreError>;
}

/// Run a store call on the blocking pool.
pub async fn blocking<S, T, F>(store: Arc<S>, f: F) -> Result<T, StoreError>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
