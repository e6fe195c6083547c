//! Error types shared across the coordination layer.
//!
//! Every error that can reach a client carries a numeric `code`, mirrored in the
//! `error {code, message}` server event.

use thiserror::Error;

/// Rejections raised while validating an inbound event, before any state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("display name is empty")]
    EmptyName,
    #[error("display name exceeds {0} characters")]
    NameTooLong(usize),
    #[error("display name may not contain {0:?}")]
    NameReservedChar(char),
    #[error("room id is missing")]
    MissingRoom,
    #[error("room id exceeds {0} characters")]
    RoomIdTooLong(usize),
    #[error("message text is empty")]
    EmptyText,
    #[error("message text exceeds {0} characters")]
    TextTooLong(usize),
    #[error("attachment is empty")]
    EmptyAttachment,
    #[error("attachment exceeds {0} bytes")]
    AttachmentTooLarge(usize),
    #[error("emoji is missing or too long")]
    InvalidEmoji,
    #[error("message id is missing")]
    MissingMessageId,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("cannot send a direct message to yourself")]
    SelfAddressed,
    #[error("connection has not announced a user")]
    NotIdentified,
    #[error("connection has not joined a room")]
    NotJoined,
    #[error("connection is already bound to {0}")]
    IdentityMismatch(String),
}

/// Failures decoding a client frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("binary frames are not supported")]
    Binary,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Failures of the message/directory stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("room already exists: {0}")]
    Duplicate(String),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Call lifecycle violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("{0} is not available")]
    Unavailable(String),
    #[error("a call with {0} is already in progress")]
    AlreadyActive(String),
    #[error("no call with {0}")]
    NoSession(String),
    #[error("cannot {signal} while {state}")]
    InvalidTransition {
        state: &'static str,
        signal: &'static str,
    },
}

/// Broadcast fabric failures.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("fabric transport closed")]
    Closed,
    #[error("envelope decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("envelope encode: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("gossip: {0}")]
    Gossip(String),
    #[error("node identity: {0}")]
    Identity(String),
}

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] figment::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors surfaced by an event handler to the sending connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Call(CallError::Unavailable(_)) | Self::Call(CallError::NoSession(_)) => 404,
            Self::Call(_) => 409,
            Self::Store(_) => 500,
        }
    }
}

impl ProtocolError {
    pub fn code(&self) -> u16 {
        match self {
            Self::UnknownEvent(_) => 404,
            _ => 400,
        }
    }
}
