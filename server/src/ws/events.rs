//! Client wire protocol: JSON text frames of the form `{"event": "...", "data": {...}}`.
//!
//! Inbound frames decode into the closed [`ClientEvent`] union with every field
//! validated; anything else is answered with an `error` event and never reaches a handler.
//! Outbound frames are produced from [`ServerEvent`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::message::{
    validate_emoji, validate_message_id, validate_room_id, validate_text, ChatMessage,
};
use crate::chat::reactions::ReactionSummary;
use crate::error::{ProtocolError, ValidationError};
use crate::rooms::RoomSummary;
use crate::session::Identity;

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    #[serde(default)]
    room_id: String,
    user: Option<NamePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextPayload {
    #[serde(default)]
    to_user: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoicePayload {
    #[serde(default)]
    to_user: Option<String>,
    #[serde(default)]
    audio: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePayload {
    #[serde(default)]
    to_user: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactPayload {
    #[serde(default)]
    to_user: Option<String>,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    #[serde(default)]
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
struct MutePayload {
    #[serde(default)]
    muted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerPayload {
    #[serde(default)]
    to_user: String,
}

#[derive(Debug, Deserialize)]
struct TargetPayload {
    #[serde(default)]
    to: String,
}

#[derive(Debug, Deserialize)]
struct RelayPayload {
    #[serde(default)]
    to: String,
    #[serde(default)]
    offer: Option<Value>,
    #[serde(default)]
    answer: Option<Value>,
    #[serde(default)]
    candidate: Option<Value>,
}

/// Validated attachment of an already-uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Validated voice note (inline data URL).
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceNote {
    pub audio: String,
    pub duration: f64,
    pub mime_type: String,
}

/// Every event a client may send, with payloads already validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    UserOnline { user: Identity },
    RoomJoin { room: String, user: Identity },
    RoomLeave,
    ChatSend { text: String },
    ChatSendVoice(VoiceNote),
    ChatSendFile(FileAttachment),
    ChatReact { message_id: String, emoji: String },
    ChatTyping { is_typing: bool },
    PresenceMute { muted: bool },
    DmHistory { to: Identity },
    DmSend { to: Identity, text: String },
    DmSendVoice { to: Identity, voice: VoiceNote },
    DmSendFile { to: Identity, file: FileAttachment },
    DmReact { to: Identity, message_id: String, emoji: String },
    CallRequest { to: Identity },
    CallAccept { to: Identity },
    CallReject { to: Identity },
    CallEnd { to: Identity },
    WebrtcOffer { to: Identity, offer: Value },
    WebrtcAnswer { to: Identity, answer: Value },
    WebrtcIce { to: Identity, candidate: Value },
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline { .. } => "user:online",
            Self::RoomJoin { .. } => "room:join",
            Self::RoomLeave => "room:leave",
            Self::ChatSend { .. } => "chat:send",
            Self::ChatSendVoice(_) => "chat:send:voice",
            Self::ChatSendFile(_) => "chat:send:file",
            Self::ChatReact { .. } => "chat:react",
            Self::ChatTyping { .. } => "chat:typing",
            Self::PresenceMute { .. } => "presence:mute",
            Self::DmHistory { .. } => "dm:history",
            Self::DmSend { .. } => "dm:send",
            Self::DmSendVoice { .. } => "dm:send:voice",
            Self::DmSendFile { .. } => "dm:send:file",
            Self::DmReact { .. } => "dm:react",
            Self::CallRequest { .. } => "call:request",
            Self::CallAccept { .. } => "call:accept",
            Self::CallReject { .. } => "call:reject",
            Self::CallEnd { .. } => "call:end",
            Self::WebrtcOffer { .. } => "webrtc:offer",
            Self::WebrtcAnswer { .. } => "webrtc:answer",
            Self::WebrtcIce { .. } => "webrtc:ice",
        }
    }
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    // Payload-less events may omit `data` entirely.
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    Ok(serde_json::from_value(data)?)
}

fn peer(raw: Option<String>) -> Result<Identity, ValidationError> {
    let raw = raw.ok_or(ValidationError::MissingField("toUser"))?;
    Identity::parse(&raw)
}

fn voice(audio: String, duration: f64, mime_type: Option<String>, max: usize) -> Result<VoiceNote, ValidationError> {
    crate::chat::message::validate_attachment(&audio, max)?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(ValidationError::MissingField("duration"));
    }
    Ok(VoiceNote {
        audio,
        duration,
        mime_type: mime_type.unwrap_or_else(|| "audio/webm".to_string()),
    })
}

fn file(p: FilePayload, max: usize) -> Result<FileAttachment, ValidationError> {
    crate::chat::message::validate_attachment(&p.url, max)?;
    if p.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    Ok(FileAttachment {
        url: p.url,
        name: p.name.trim().to_string(),
        size: p.size,
        mime_type: p
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    })
}

fn relay_value(value: Option<Value>, field: &'static str) -> Result<Value, ValidationError> {
    match value {
        Some(Value::Null) | None => Err(ValidationError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

/// Decode and validate one text frame.
///
/// `max_attachment_bytes` bounds inline voice data and file URLs.
pub fn decode(text: &str, max_attachment_bytes: usize) -> Result<ClientEvent, ProtocolError> {
    let frame: RawFrame = serde_json::from_str(text)?;
    let max = max_attachment_bytes;

    let event = match frame.event.as_str() {
        "user:online" => {
            let p: NamePayload = payload(frame.data)?;
            ClientEvent::UserOnline {
                user: Identity::parse(&p.name)?,
            }
        }
        "room:join" => {
            let p: JoinPayload = payload(frame.data)?;
            let user = p.user.ok_or(ValidationError::MissingField("user"))?;
            ClientEvent::RoomJoin {
                room: validate_room_id(&p.room_id)?,
                user: Identity::parse(&user.name)?,
            }
        }
        "room:leave" => ClientEvent::RoomLeave,
        "chat:send" => {
            let p: TextPayload = payload(frame.data)?;
            ClientEvent::ChatSend {
                text: validate_text(&p.text)?,
            }
        }
        "chat:send:voice" => {
            let p: VoicePayload = payload(frame.data)?;
            ClientEvent::ChatSendVoice(voice(p.audio, p.duration, p.mime_type, max)?)
        }
        "chat:send:file" => {
            let p: FilePayload = payload(frame.data)?;
            ClientEvent::ChatSendFile(file(p, max)?)
        }
        "chat:react" => {
            let p: ReactPayload = payload(frame.data)?;
            ClientEvent::ChatReact {
                message_id: validate_message_id(&p.message_id)?,
                emoji: validate_emoji(&p.emoji)?,
            }
        }
        "chat:typing" => {
            let p: TypingPayload = payload(frame.data)?;
            ClientEvent::ChatTyping {
                is_typing: p.is_typing,
            }
        }
        "presence:mute" => {
            let p: MutePayload = payload(frame.data)?;
            ClientEvent::PresenceMute { muted: p.muted }
        }
        "dm:history" => {
            let p: PeerPayload = payload(frame.data)?;
            ClientEvent::DmHistory {
                to: Identity::parse(&p.to_user)?,
            }
        }
        "dm:send" => {
            let p: TextPayload = payload(frame.data)?;
            ClientEvent::DmSend {
                to: peer(p.to_user)?,
                text: validate_text(&p.text)?,
            }
        }
        "dm:send:voice" => {
            let p: VoicePayload = payload(frame.data)?;
            ClientEvent::DmSendVoice {
                to: peer(p.to_user)?,
                voice: voice(p.audio, p.duration, p.mime_type, max)?,
            }
        }
        "dm:send:file" => {
            let mut p: FilePayload = payload(frame.data)?;
            let to = peer(p.to_user.take())?;
            ClientEvent::DmSendFile {
                to,
                file: file(p, max)?,
            }
        }
        "dm:react" => {
            let p: ReactPayload = payload(frame.data)?;
            ClientEvent::DmReact {
                to: peer(p.to_user)?,
                message_id: validate_message_id(&p.message_id)?,
                emoji: validate_emoji(&p.emoji)?,
            }
        }
        "call:request" | "call:accept" | "call:reject" | "call:end" => {
            let p: TargetPayload = payload(frame.data)?;
            let to = Identity::parse(&p.to)?;
            match frame.event.as_str() {
                "call:request" => ClientEvent::CallRequest { to },
                "call:accept" => ClientEvent::CallAccept { to },
                "call:reject" => ClientEvent::CallReject { to },
                _ => ClientEvent::CallEnd { to },
            }
        }
        "webrtc:offer" => {
            let p: RelayPayload = payload(frame.data)?;
            ClientEvent::WebrtcOffer {
                to: Identity::parse(&p.to)?,
                offer: relay_value(p.offer, "offer")?,
            }
        }
        "webrtc:answer" => {
            let p: RelayPayload = payload(frame.data)?;
            ClientEvent::WebrtcAnswer {
                to: Identity::parse(&p.to)?,
                answer: relay_value(p.answer, "answer")?,
            }
        }
        "webrtc:ice" => {
            let p: RelayPayload = payload(frame.data)?;
            ClientEvent::WebrtcIce {
                to: Identity::parse(&p.to)?,
                candidate: relay_value(p.candidate, "candidate")?,
            }
        }
        other => return Err(ProtocolError::UnknownEvent(other.to_string())),
    };
    Ok(event)
}

/// `{name}` entry of a `room:users` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub name: String,
}

/// Every event the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "room:users", rename_all = "camelCase")]
    RoomUsers { room_id: String, users: Vec<UserRef> },
    #[serde(rename = "room:left", rename_all = "camelCase")]
    RoomLeft { room_id: String },
    #[serde(rename = "rooms:list")]
    RoomsList { rooms: Vec<RoomSummary> },
    #[serde(rename = "chat:history", rename_all = "camelCase")]
    ChatHistory {
        room_id: String,
        messages: Vec<ChatMessage>,
        reactions: Vec<ReactionSummary>,
    },
    #[serde(rename = "chat:message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "chat:reaction", rename_all = "camelCase")]
    ChatReaction {
        message_id: String,
        emoji: String,
        user: String,
        users: Vec<String>,
    },
    #[serde(rename = "chat:typing", rename_all = "camelCase")]
    Typing { user: String, is_typing: bool },
    #[serde(rename = "presence:muted")]
    Muted { user: String, muted: bool },
    #[serde(rename = "dm:history", rename_all = "camelCase")]
    DmHistory {
        dm_id: String,
        history: Vec<ChatMessage>,
        reactions: Vec<ReactionSummary>,
    },
    #[serde(rename = "dm:message")]
    DmMessage(ChatMessage),
    #[serde(rename = "dm:reaction", rename_all = "camelCase")]
    DmReaction {
        dm_id: String,
        message_id: String,
        emoji: String,
        user: String,
        users: Vec<String>,
    },
    #[serde(rename = "call:incoming")]
    CallIncoming { from: String },
    #[serde(rename = "call:ringing")]
    CallRinging { from: String },
    #[serde(rename = "call:accepted")]
    CallAccepted { from: String },
    #[serde(rename = "call:rejected")]
    CallRejected { from: String },
    #[serde(rename = "call:ended")]
    CallEnded { from: String },
    #[serde(rename = "call:missed")]
    CallMissed { from: String },
    #[serde(rename = "call:unavailable")]
    CallUnavailable { to: String },
    #[serde(rename = "webrtc:offer")]
    WebrtcOffer { from: String, offer: Value },
    #[serde(rename = "webrtc:answer")]
    WebrtcAnswer { from: String, answer: Value },
    #[serde(rename = "webrtc:ice")]
    WebrtcIce { from: String, candidate: Value },
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

impl ServerEvent {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
