//! Room chat: the message model shared with DMs, message handlers and reactions.

pub mod message;
pub mod messages;
pub mod reactions;
