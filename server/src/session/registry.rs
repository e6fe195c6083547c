//! Per-connection session state for the connections this node physically holds.

use dashmap::DashMap;

use super::{ConnectionId, Identity};

/// What a connection is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub identity: Identity,
    pub room: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<Identity>,
    room: Option<String>,
    /// One-shot teardown guard. Set by whichever teardown path runs first.
    left_cleanly: bool,
}

/// Connection session registry.
///
/// Both the explicit `room:leave` path and the transport disconnect path funnel
/// through [`SessionRegistry::mark_left_cleanly`], which hands out the binding
/// exactly once; cleanup is driven by that return value, never by re-reading state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub fn open(&self, connection: ConnectionId) {
        self.sessions.insert(connection, SessionState::default());
    }

    /// Associate `identity` and `room` with `connection` and clear the left-cleanly flag.
    ///
    /// Returns the binding being replaced, if the connection had a live one.
    pub fn bind(
        &self,
        connection: ConnectionId,
        identity: Identity,
        room: Option<String>,
    ) -> Option<Binding> {
        let mut session = self.sessions.entry(connection).or_default();
        let previous = if session.left_cleanly {
            None
        } else {
            session.identity.take().map(|identity| Binding {
                identity,
                room: session.room.take(),
            })
        };
        session.identity = Some(identity);
        session.room = room;
        session.left_cleanly = false;
        previous
    }

    /// Set the teardown guard and hand out the live binding.
    ///
    /// Returns `None` if the guard was already set or nothing was bound, so at most
    /// one caller ever receives a given binding.
    pub fn mark_left_cleanly(&self, connection: ConnectionId) -> Option<Binding> {
        let mut session = self.sessions.get_mut(&connection)?;
        if session.left_cleanly {
            return None;
        }
        session.left_cleanly = true;
        let room = session.room.take();
        session.identity.take().map(|identity| Binding { identity, room })
    }

    /// Current live binding of a connection.
    pub fn binding(&self, connection: ConnectionId) -> Option<Binding> {
        let session = self.sessions.get(&connection)?;
        if session.left_cleanly {
            return None;
        }
        session.identity.clone().map(|identity| Binding {
            identity,
            room: session.room.clone(),
        })
    }

    pub fn identity(&self, connection: ConnectionId) -> Option<Identity> {
        self.binding(connection).map(|b| b.identity)
    }

    /// Forget a connection entirely (after its transport closed).
    pub fn close(&self, connection: ConnectionId) {
        self.sessions.remove(&connection);
    }

    /// Live bindings of every connection on this node.
    pub fn bindings(&self) -> Vec<(ConnectionId, Binding)> {
        self.sessions
            .iter()
            .filter(|s| !s.left_cleanly)
            .filter_map(|s| {
                s.identity.clone().map(|identity| {
                    (
                        *s.key(),
                        Binding {
                            identity,
                            room: s.room.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn alice() -> Identity {
        Identity::parse("Alice").unwrap()
    }

    #[test]
    fn test_mark_left_cleanly_hands_out_binding_once() {
        let sessions = SessionRegistry::new();
        let conn = ConnectionId::new();
        sessions.open(conn);
        sessions.bind(conn, alice(), Some("general".into()));

        let first = sessions.mark_left_cleanly(conn);
        let second = sessions.mark_left_cleanly(conn);

        assert_eq!(
            first,
            Some(Binding {
                identity: alice(),
                room: Some("general".into())
            })
        );
        assert_eq!(second, None);
        assert!(sessions.binding(conn).is_none());
        assert!(sessions.bindings().is_empty());
    }

    #[test]
    fn test_bind_clears_left_flag() {
        let sessions = SessionRegistry::new();
        let conn = ConnectionId::new();
        sessions.open(conn);
        sessions.bind(conn, alice(), Some("general".into()));
        sessions.mark_left_cleanly(conn);

        let previous = sessions.bind(conn, alice(), None);
        assert_eq!(previous, None);
        assert_eq!(sessions.identity(conn), Some(alice()));
    }

    #[test]
    fn test_bind_returns_replaced_binding() {
        let sessions = SessionRegistry::new();
        let conn = ConnectionId::new();
        sessions.open(conn);
        sessions.bind(conn, alice(), Some("one".into()));
        let previous = sessions.bind(conn, alice(), Some("two".into()));
        assert_eq!(previous.and_then(|b| b.room), Some("one".to_string()));
    }

    #[test]
    fn test_concurrent_teardown_runs_once() {
        let sessions = Arc::new(SessionRegistry::new());
        let conn = ConnectionId::new();
        sessions.open(conn);
        sessions.bind(conn, alice(), Some("general".into()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = sessions.clone();
                std::thread::spawn(move || sessions.mark_left_cleanly(conn).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_unknown_connection_has_nothing_to_tear_down() {
        let sessions = SessionRegistry::new();
        let conn = ConnectionId::new();
        assert!(sessions.binding(conn).is_none());
        assert!(sessions.mark_left_cleanly(conn).is_none());
    }
}
