//! Presence directory: normalized user name -> locator of the user's current connection.
//!
//! Every node keeps a full replica. Local registrations are applied here first and then
//! published through the fabric; remote ones arrive as fleet events and land in the same map.

use dashmap::DashMap;

use super::{Identity, Locator, NodeId};

/// Info tracked per online user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub identity: Identity,
    pub locator: Locator,
}

#[derive(Debug, Default)]
pub struct PresenceDirectory {
    entries: DashMap<String, PresenceEntry>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` at `locator`, replacing any previous entry (last registration wins).
    ///
    /// Returns the superseded entry, if any.
    pub fn register(&self, identity: &Identity, locator: Locator) -> Option<PresenceEntry> {
        let previous = self.entries.insert(
            identity.key().to_string(),
            PresenceEntry {
                identity: identity.clone(),
                locator,
            },
        );
        tracing::debug!(
            user = %identity,
            superseded = previous.is_some(),
            "Presence registered"
        );
        previous
    }

    pub fn lookup(&self, identity: &Identity) -> Option<PresenceEntry> {
        self.entries.get(identity.key()).map(|e| e.value().clone())
    }

    /// Remove the entry for `identity` only if it still points at `locator`.
    ///
    /// A connection that has been superseded by a newer registration cannot
    /// remove the newer entry. Returns true when an entry was removed.
    pub fn remove(&self, identity: &Identity, locator: &Locator) -> bool {
        let removed = self
            .entries
            .remove_if(identity.key(), |_, entry| &entry.locator == locator)
            .is_some();
        if removed {
            tracing::debug!(user = %identity, "Presence removed");
        }
        removed
    }

    /// Entries whose connection lives on `node`.
    pub fn held_by(&self, node: &NodeId) -> Vec<PresenceEntry> {
        self.entries
            .iter()
            .filter(|e| e.value().locator.is_on(node))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
