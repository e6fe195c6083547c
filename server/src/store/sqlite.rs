use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{migrations, DirectoryStore, HistoryStore};
use crate::chat::message::{ChannelId, ChatMessage};
use crate::chat::reactions::{ReactionKey, ReactionVersion, Reactors};
use crate::error::StoreError;
use crate::rooms::directory::RoomSummary;

/// SQLite-backed store.
///
/// Every process in the fleet may open the same file; WAL mode plus a busy timeout
/// lets them append concurrently.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    max_messages: usize,
}

impl SqliteStore {
    /// Create `data_dir` if needed, open `chorus.db` inside it and run migrations.
    pub fn open(data_dir: &str, max_messages: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = Path::new(data_dir).join("chorus.db");
        let conn = Connection::open(&db_path)?;
        let store = Self::init(conn, max_messages)?;
        tracing::info!(path = %db_path.display(), "Database initialized");
        Ok(store)
    }

    /// Private in-memory database (tests).
    pub fn open_in_memory(max_messages: usize) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, max_messages)
    }

    fn init(mut conn: Connection, max_messages: usize) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::migrations().to_latest(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_messages: max_messages.max(1),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

impl HistoryStore for SqliteStore {
    fn append(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let channel = message.channel();
        let body = serde_json::to_string(&message)?;
        let max = self.max_messages as i64;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (channel, id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![channel.as_str(), message.id, body, message.created_at],
            )?;
            tx.execute(
                "DELETE FROM messages WHERE channel = ?1 AND seq NOT IN (
                    SELECT seq FROM messages WHERE channel = ?1 ORDER BY seq DESC LIMIT ?2
                )",
                params![channel.as_str(), max],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(message)
    }

    fn history(&self, channel: &ChannelId) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM messages WHERE channel = ?1 ORDER BY seq ASC")?;
            let bodies = stmt
                .query_map(params![channel.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|b| serde_json::from_str(b).map_err(StoreError::from))
                .collect()
        })
    }

    fn save_reactors(&self, key: &ReactionKey, reactors: &Reactors) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&reactors.users)?;
        let counter = reactors.version.counter as i64;
        self.with_conn(|conn| {
            // Nodes sharing the file may write out of order; keep the newest version.
            conn.execute(
                "INSERT INTO reactions (channel, message_id, emoji, users, version, origin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (channel, message_id, emoji)
                 DO UPDATE SET users = excluded.users, version = excluded.version, origin = excluded.origin
                 WHERE excluded.version > reactions.version
                    OR (excluded.version = reactions.version AND excluded.origin > reactions.origin)",
                params![
                    key.channel.as_str(),
                    key.message_id,
                    key.emoji,
                    encoded,
                    counter,
                    reactors.version.origin
                ],
            )?;
            Ok(())
        })
    }

    fn reactions(&self) -> Result<Vec<(ReactionKey, Reactors)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT channel, message_id, emoji, users, version, origin FROM reactions")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(channel, message_id, emoji, users, counter, origin)| {
                    let users: Vec<String> = serde_json::from_str(&users)?;
                    Ok((
                        ReactionKey::new(ChannelId::from_raw(channel), message_id, emoji),
                        Reactors {
                            users,
                            version: ReactionVersion {
                                counter: counter as u64,
                                origin,
                            },
                        },
                    ))
                })
                .collect()
        })
    }
}

impl DirectoryStore for SqliteStore {
    fn create_room(&self, room: &RoomSummary) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO rooms (id, name, icon, users, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    room.id,
                    room.name,
                    room.icon,
                    room.users as i64,
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Duplicate(room.id.clone()));
            }
            Ok(())
        })
    }

    fn list_rooms(&self) -> Result<Vec<RoomSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, icon, users FROM rooms ORDER BY created_at, rowid")?;
            let rooms = stmt
                .query_map([], |row| {
                    Ok(RoomSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        icon: row.get(2)?,
                        users: row.get::<_, i64>(3)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
    }

    fn update_count(&self, room_id: &str, users: usize) -> Result<RoomSummary, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, name, icon, users, created_at) VALUES (?1, ?1, NULL, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET users = excluded.users",
                params![room_id, users as i64, chrono::Utc::now().to_rfc3339()],
            )?;
            let room = conn
                .query_row(
                    "SELECT id, name, icon, users FROM rooms WHERE id = ?1",
                    params![room_id],
                    |row| {
                        Ok(RoomSummary {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            icon: row.get(2)?,
                            users: row.get::<_, i64>(3)? as usize,
                        })
                    },
                )
                .optional()?;
            room.ok_or_else(|| StoreError::Task(format!("room {room_id} vanished after upsert")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::MessageBody;

    fn text(room: &str, author: &str, text: &str) -> ChatMessage {
        ChatMessage::in_room(room, author, MessageBody::Text { text: text.into() })
    }

    #[test]
    fn test_append_and_history_in_order() {
        let store = SqliteStore::open_in_memory(10).unwrap();
        let first = store.append(text("general", "Alice", "one")).unwrap();
        let second = store.append(text("general", "Bob", "two")).unwrap();
        store.append(text("random", "Bob", "elsewhere")).unwrap();

        let history = store.history(&ChannelId::room("general")).unwrap();
        assert_eq!(history, vec![first, second]);
    }

    #[test]
    fn test_history_is_trimmed_to_bound() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        for i in 0..5 {
            store.append(text("general", "Alice", &format!("m{i}"))).unwrap();
        }
        let history = store.history(&ChannelId::room("general")).unwrap();
        let texts: Vec<_> = history
            .iter()
            .map(|m| match &m.body {
                MessageBody::Text { text } => text.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    fn reactors(users: &[&str], counter: u64, origin: &str) -> Reactors {
        Reactors {
            users: users.iter().map(|u| u.to_string()).collect(),
            version: ReactionVersion {
                counter,
                origin: origin.into(),
            },
        }
    }

    #[test]
    fn test_reactors_upsert_and_clear() {
        let store = SqliteStore::open_in_memory(10).unwrap();
        let key = ReactionKey::new(ChannelId::room("general"), "m1", "👍");
        store.save_reactors(&key, &reactors(&["Alice"], 1, "n1")).unwrap();
        store
            .save_reactors(&key, &reactors(&["Alice", "Bob"], 2, "n1"))
            .unwrap();
        assert_eq!(
            store.reactions().unwrap(),
            vec![(key.clone(), reactors(&["Alice", "Bob"], 2, "n1"))]
        );
        store.save_reactors(&key, &reactors(&[], 3, "n1")).unwrap();
        assert_eq!(store.reactions().unwrap(), vec![(key, reactors(&[], 3, "n1"))]);
    }

    #[test]
    fn test_older_reactor_set_does_not_overwrite() {
        let store = SqliteStore::open_in_memory(10).unwrap();
        let key = ReactionKey::new(ChannelId::room("general"), "m1", "👍");
        store.save_reactors(&key, &reactors(&["Bob"], 4, "n2")).unwrap();
        store.save_reactors(&key, &reactors(&["Alice"], 3, "n1")).unwrap();
        store.save_reactors(&key, &reactors(&["Carol"], 4, "n1")).unwrap();
        assert_eq!(store.reactions().unwrap()[0].1, reactors(&["Bob"], 4, "n2"));

        store.save_reactors(&key, &reactors(&["Dave"], 4, "n3")).unwrap();
        assert_eq!(store.reactions().unwrap()[0].1.users, vec!["Dave"]);
    }

    #[test]
    fn test_rooms_create_duplicate_and_count() {
        let store = SqliteStore::open_in_memory(10).unwrap();
        let lobby = RoomSummary::new("lobby", "Lobby", Some("🏠".into()));
        store.create_room(&lobby).unwrap();
        assert!(matches!(
            store.create_room(&lobby),
            Err(StoreError::Duplicate(_))
        ));

        let updated = store.update_count("lobby", 3).unwrap();
        assert_eq!(updated.users, 3);
        assert_eq!(updated.name, "Lobby");

        let implicit = store.update_count("general", 1).unwrap();
        assert_eq!(implicit.name, "general");
        assert_eq!(store.list_rooms().unwrap().len(), 2);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        {
            let store = SqliteStore::open(path, 10).unwrap();
            store.append(text("general", "Alice", "persisted")).unwrap();
        }
        let store = SqliteStore::open(path, 10).unwrap();
        assert_eq!(store.history(&ChannelId::room("general")).unwrap().len(), 1);
    }
}
