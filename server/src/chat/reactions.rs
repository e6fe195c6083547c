//! Reaction ledger: (channel, message id, emoji) -> set of reacting users.
//!
//! Each key is guarded by its DashMap shard lock for the whole read-modify-write,
//! including the optional persistence callback, so concurrent toggles on the same
//! key serialize and toggles on different keys never lose each other's updates.
//! Since that callback may hit the disk, async callers reach the ledger through
//! [`crate::store::blocking`].
//!
//! Every set carries a [`ReactionVersion`]. Sets published by other nodes only
//! replace older ones, and a cleared set stays behind as an empty tombstone so a
//! delayed update cannot bring it back.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use super::message::ChannelId;
use crate::session::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionKey {
    pub channel: ChannelId,
    pub message_id: String,
    pub emoji: String,
}

impl ReactionKey {
    pub fn new(channel: ChannelId, message_id: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
            emoji: emoji.into(),
        }
    }
}

/// Version of one reactor set: a per-key counter, ties broken by the node that
/// wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReactionVersion {
    pub counter: u64,
    pub origin: String,
}

/// A reactor set as persisted and published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactors {
    /// Display names, in reaction order. Empty for a cleared set.
    pub users: Vec<String>,
    pub version: ReactionVersion,
}

/// Result of one toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionChange {
    pub key: ReactionKey,
    /// The set after the toggle.
    pub reactors: Reactors,
    /// True if the toggling user was added, false if removed.
    pub added: bool,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    users: Vec<Identity>,
    version: ReactionVersion,
}

/// Reactions on one message, grouped by emoji. Overlaid onto replayed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub message_id: String,
    pub emoji: String,
    pub users: Vec<String>,
}

#[derive(Debug)]
pub struct ReactionLedger {
    /// Node id stamped on versions written here.
    origin: String,
    entries: DashMap<ReactionKey, Entry>,
}

impl ReactionLedger {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: DashMap::new(),
        }
    }

    /// Toggle `user` on `key` without persistence.
    pub fn toggle(&self, key: ReactionKey, user: &Identity) -> ReactionChange {
        match self.toggle_with(key, user, |_, _| Ok::<(), Infallible>(())) {
            Ok(change) => change,
            Err(never) => match never {},
        }
    }

    /// Toggle `user` on `key`, running `persist` with the resulting set while the
    /// key is still locked.
    ///
    /// If `persist` fails the ledger is left exactly as it was.
    pub fn toggle_with<F, E>(
        &self,
        key: ReactionKey,
        user: &Identity,
        persist: F,
    ) -> Result<ReactionChange, E>
    where
        F: FnOnce(&ReactionKey, &Reactors) -> Result<(), E>,
    {
        let mut entry = self.entries.entry(key.clone()).or_default();
        let mut users = entry.users.clone();
        let added = match users.iter().position(|u| u == user) {
            Some(index) => {
                users.remove(index);
                false
            }
            None => {
                users.push(user.clone());
                true
            }
        };
        let version = ReactionVersion {
            counter: entry.version.counter + 1,
            origin: self.origin.clone(),
        };
        let reactors = Reactors {
            users: names(&users),
            version: version.clone(),
        };

        if let Err(e) = persist(&key, &reactors) {
            // Drop the placeholder a first reaction inserted.
            let fresh = entry.version.counter == 0;
            drop(entry);
            if fresh {
                self.entries.remove_if(&key, |_, placeholder| placeholder.version.counter == 0);
            }
            return Err(e);
        }
        *entry = Entry { users, version };
        Ok(ReactionChange {
            key,
            reactors,
            added,
        })
    }

    /// Take a set published by another node if it is newer than ours.
    ///
    /// Returns false for a stale or duplicate update.
    pub fn apply_remote(&self, key: ReactionKey, reactors: &Reactors) -> bool {
        let mut entry = self.entries.entry(key).or_default();
        if reactors.version <= entry.version {
            return false;
        }
        *entry = Entry {
            users: reactors
                .users
                .iter()
                .filter_map(|u| Identity::parse(u).ok())
                .collect(),
            version: reactors.version.clone(),
        };
        true
    }

    /// Load persisted reactor sets (startup).
    pub fn hydrate(&self, rows: impl IntoIterator<Item = (ReactionKey, Reactors)>) -> usize {
        rows.into_iter()
            .filter(|(key, reactors)| self.apply_remote(key.clone(), reactors))
            .count()
    }

    pub fn reactors(&self, key: &ReactionKey) -> Vec<String> {
        self.entries
            .get(key)
            .map(|e| names(&e.users))
            .unwrap_or_default()
    }

    /// Every reaction in `channel`, for overlay onto its history.
    pub fn snapshot(&self, channel: &ChannelId) -> Vec<ReactionSummary> {
        let mut summaries: Vec<ReactionSummary> = self
            .entries
            .iter()
            .filter(|e| &e.key().channel == channel && !e.users.is_empty())
            .map(|e| ReactionSummary {
                message_id: e.key().message_id.clone(),
                emoji: e.key().emoji.clone(),
                users: names(&e.users),
            })
            .collect();
        summaries.sort_by(|a, b| (&a.message_id, &a.emoji).cmp(&(&b.message_id, &b.emoji)));
        summaries
    }

    /// Number of keys with at least one reactor.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.users.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn names(users: &[Identity]) -> Vec<String> {
    users.iter().map(|u| u.name().to_string()).collect()
}
