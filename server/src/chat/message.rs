//! Chat message model shared by rooms and DM channels, plus payload validation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::call::CallRecord;
use crate::error::ValidationError;
use crate::session::Identity;

/// Maximum message text length (chars).
pub const MAX_TEXT_LENGTH: usize = 4000;
/// Maximum room id length (chars).
pub const MAX_ROOM_ID_LENGTH: usize = 128;
/// Maximum emoji length (bytes).
pub const MAX_EMOJI_LENGTH: usize = 64;

/// Key of one message log: a room or a DM pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn room(room_id: &str) -> Self {
        Self(format!("room:{room_id}"))
    }

    pub fn dm(a: &Identity, b: &Identity) -> Self {
        Self(format!("dm:{}", crate::dm::channel_id(a, b)))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind-specific message payload. Serialized inline with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Voice {
        audio: String,
        duration: f64,
        mime_type: String,
    },
    File {
        url: String,
        name: String,
        size: u64,
        mime_type: String,
    },
    System {
        text: String,
    },
    CallLog {
        text: String,
        call: CallRecord,
    },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Voice { .. } => "voice",
            Self::File { .. } => "file",
            Self::System { .. } => "system",
            Self::CallLog { .. } => "call-log",
        }
    }
}

/// An immutable chat entry. Reactions live in the reaction ledger, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_id: Option<String>,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub created_at: i64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn in_room(room_id: &str, author: &str, body: MessageBody) -> Self {
        Self {
            id: new_message_id(),
            room_id: Some(room_id.to_string()),
            dm_id: None,
            author: author.to_string(),
            to: None,
            created_at: Utc::now().timestamp_millis(),
            body,
        }
    }

    pub fn in_dm(from: &Identity, to: &Identity, body: MessageBody) -> Self {
        Self {
            id: new_message_id(),
            room_id: None,
            dm_id: Some(crate::dm::channel_id(from, to)),
            author: from.name().to_string(),
            to: Some(to.name().to_string()),
            created_at: Utc::now().timestamp_millis(),
            body,
        }
    }

    /// Synthetic room announcement ("Alice joined the room").
    pub fn system(room_id: &str, text: String) -> Self {
        Self::in_room(room_id, "system", MessageBody::System { text })
    }

    /// The log this message belongs to.
    pub fn channel(&self) -> ChannelId {
        match (&self.room_id, &self.dm_id) {
            (Some(room), _) => ChannelId::room(room),
            (None, Some(dm)) => ChannelId::from_raw(format!("dm:{dm}")),
            (None, None) => ChannelId::from_raw("orphan"),
        }
    }
}

/// Unique (not globally ordered) message id.
pub fn new_message_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub fn validate_room_id(raw: &str) -> Result<String, ValidationError> {
    let room = raw.trim();
    if room.is_empty() {
        return Err(ValidationError::MissingRoom);
    }
    if room.chars().count() > MAX_ROOM_ID_LENGTH {
        return Err(ValidationError::RoomIdTooLong(MAX_ROOM_ID_LENGTH));
    }
    Ok(room.to_string())
}

pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ValidationError::TextTooLong(MAX_TEXT_LENGTH));
    }
    Ok(text.to_string())
}

pub fn validate_emoji(raw: &str) -> Result<String, ValidationError> {
    let emoji = raw.trim();
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LENGTH {
        return Err(ValidationError::InvalidEmoji);
    }
    Ok(emoji.to_string())
}

pub fn validate_message_id(raw: &str) -> Result<String, ValidationError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ValidationError::MissingMessageId);
    }
    Ok(id.to_string())
}

/// Check an inline attachment (voice data URL, file URL) against the size limit.
pub fn validate_attachment(data: &str, max_bytes: usize) -> Result<(), ValidationError> {
    if data.trim().is_empty() {
        return Err(ValidationError::EmptyAttachment);
    }
    if data.len() > max_bytes {
        return Err(ValidationError::AttachmentTooLarge(max_bytes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_serializes_with_kind_tag() {
        let msg = ChatMessage::in_room(
            "general",
            "Alice",
            MessageBody::Text { text: "hi".into() },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["author"], "Alice");
        assert_eq!(json["roomId"], "general");
        assert!(json.get("dmId").is_none());

        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_voice_fields_are_camel_case() {
        let msg = ChatMessage::in_room(
            "general",
            "Bob",
            MessageBody::Voice {
                audio: "data:audio/webm;base64,AAAA".into(),
                duration: 2.5,
                mime_type: "audio/webm".into(),
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "voice");
        assert_eq!(json["mimeType"], "audio/webm");
    }

    #[test]
    fn test_channel_of_dm_message_matches_channel_id() {
        let alice = Identity::parse("Alice").unwrap();
        let bob = Identity::parse("Bob").unwrap();
        let msg = ChatMessage::in_dm(&bob, &alice, MessageBody::Text { text: "yo".into() });
        assert_eq!(msg.channel(), ChannelId::dm(&alice, &bob));
    }

    #[test]
    fn test_validation_trims_and_rejects() {
        assert_eq!(validate_text("  hi "), Ok("hi".to_string()));
        assert_eq!(validate_text("   "), Err(ValidationError::EmptyText));
        assert_eq!(validate_room_id(""), Err(ValidationError::MissingRoom));
        assert_eq!(validate_emoji(""), Err(ValidationError::InvalidEmoji));
        assert_eq!(
            validate_attachment("abcd", 2),
            Err(ValidationError::AttachmentTooLarge(2))
        );
    }
}
