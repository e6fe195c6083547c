//! Room membership table: room id -> members currently connected, in join order.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::session::{Identity, Locator, NodeId};

/// One connected member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub identity: Identity,
    pub locator: Locator,
}

/// Fleet-wide replica of room membership.
///
/// Also owns one async gate per room. Handlers hold the gate across
/// "mutate membership, replay history, deliver" so a joiner sees its snapshot
/// and backlog before any live message sent after the join.
#[derive(Debug, Default)]
pub struct MembershipTable {
    rooms: DashMap<String, Vec<Member>>,
    gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Handle on one room's gate. The gate is dropped from the table once the last
/// handle goes away.
pub struct RoomGate {
    room: String,
    lock: Arc<Mutex<()>>,
    gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RoomGate {
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for RoomGate {
    fn drop(&mut self) {
        // One reference is the table's, one is ours.
        self.gates
            .remove_if(&self.room, |_, gate| Arc::strong_count(gate) == 2);
    }
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` at `locator` to `room` and return the resulting member list.
    ///
    /// A user already present keeps their position; their locator is replaced.
    pub fn join(&self, room: &str, identity: &Identity, locator: Locator) -> Vec<Member> {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        match members.iter_mut().find(|m| &m.identity == identity) {
            Some(existing) => {
                existing.identity = identity.clone();
                existing.locator = locator;
            }
            None => members.push(Member {
                identity: identity.clone(),
                locator,
            }),
        }
        members.clone()
    }

    /// Remove `identity` from `room` if its membership still points at `locator`.
    ///
    /// Returns the resulting member list when something changed, `None` otherwise.
    /// The room entry is pruned once empty.
    pub fn leave(&self, room: &str, identity: &Identity, locator: &Locator) -> Option<Vec<Member>> {
        let remaining = {
            let mut members = self.rooms.get_mut(room)?;
            let before = members.len();
            members.retain(|m| !(&m.identity == identity && &m.locator == locator));
            if members.len() == before {
                return None;
            }
            members.clone()
        };
        if remaining.is_empty() {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        Some(remaining)
    }

    pub fn members(&self, room: &str) -> Vec<Member> {
        self.rooms
            .get(room)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Memberships whose connection lives on `node`, as (room, member) pairs.
    pub fn held_by(&self, node: &NodeId) -> Vec<(String, Member)> {
        self.rooms
            .iter()
            .flat_map(|entry| {
                let room = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .filter(|m| m.locator.is_on(node))
                    .map(|m| (room.clone(), m.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Sequencing gate for `room`.
    pub fn gate(&self, room: &str) -> RoomGate {
        let lock = self.gates.entry(room.to_string()).or_default().clone();
        RoomGate {
            room: room.to_string(),
            lock,
            gates: self.gates.clone(),
        }
    }
}
