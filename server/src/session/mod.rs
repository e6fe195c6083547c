//! Connection identity: who is connected, where, and how to reach them.

pub mod lifecycle;
pub mod presence;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

pub use presence::{PresenceDirectory, PresenceEntry};
pub use registry::{Binding, SessionRegistry};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Opaque id of one WebSocket connection, unique across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Id of one server process in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a connection lives: the owning node plus the connection on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    pub node: NodeId,
    pub connection: ConnectionId,
}

impl Locator {
    pub fn new(node: NodeId, connection: ConnectionId) -> Self {
        Self { node, connection }
    }

    pub fn is_on(&self, node: &NodeId) -> bool {
        &self.node == node
    }
}

/// Normalize a display name into its routing key (trimmed, lowercase).
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A display name together with its case-insensitive routing key.
///
/// Equality and hashing only consider the key, so "Alice" and " alice "
/// are the same user for routing purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    name: String,
    key: String,
}

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(ValidationError::NameTooLong(MAX_NAME_LENGTH));
        }
        // `:` separates the two keys of a DM channel id.
        if let Some(c) = name.chars().find(|c| *c == ':' || c.is_control()) {
            return Err(ValidationError::NameReservedChar(c));
        }
        Ok(Self {
            name: name.to_string(),
            key: normalize(name),
        })
    }

    /// Display name as the user typed it (trimmed).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized routing key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Identity {}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_normalizes_case_and_whitespace() {
        let a = Identity::parse("  Alice ").unwrap();
        let b = Identity::parse("alice").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name(), "Alice");
        assert_eq!(a.key(), "alice");
    }

    #[test]
    fn test_identity_rejects_blank_and_long_names() {
        assert_eq!(Identity::parse("   "), Err(ValidationError::EmptyName));
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert_eq!(
            Identity::parse(&long),
            Err(ValidationError::NameTooLong(MAX_NAME_LENGTH))
        );
    }

    #[test]
    fn test_identity_rejects_separator_characters() {
        assert_eq!(Identity::parse("b:c"), Err(ValidationError::NameReservedChar(':')));
        assert_eq!(Identity::parse("a\nb"), Err(ValidationError::NameReservedChar('\n')));
        assert!(Identity::parse("a b").is_ok());
    }
}
