use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's user_version pragma.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: message logs, reactions, room directory

CREATE TABLE messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    id TEXT NOT NULL UNIQUE,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX idx_messages_channel ON messages(channel, seq);

CREATE TABLE reactions (
    channel TEXT NOT NULL,
    message_id TEXT NOT NULL,
    emoji TEXT NOT NULL,
    users TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (channel, message_id, emoji)
);

CREATE TABLE rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    icon TEXT,
    users INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
",
        ),
        M::up(
            "-- Migration 2: node that wrote each reactor set, for ordering equal versions

ALTER TABLE reactions ADD COLUMN origin TEXT NOT NULL DEFAULT '';
",
        ),
    ])
}
