use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::MessagePayload,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    pub fn generate() -> Self {
        Self(format!(
            "local-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageRef {
    Server(MessageId),
    Local(TempId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageRef,
    pub from_user_id: UserId,
    pub from_username: String,
    pub to_user_id: UserId,
    pub to_username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub provisional: bool,
}

impl ChatMessage {
    pub fn server_id(&self) -> Option<MessageId> {
        match &self.id {
            MessageRef::Server(id) => Some(*id),
            MessageRef::Local(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match &self.id {
            MessageRef::Local(id) => Some(id),
            MessageRef::Server(_) => None,
        }
    }

    pub fn timestamp_iso8601(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub(crate) fn same_content(&self, other: &ChatMessage) -> bool {
        self.text == other.text
            && self.from_user_id == other.from_user_id
            && self.to_user_id == other.to_user_id
    }
}

impl From<MessagePayload> for ChatMessage {
    fn from(payload: MessagePayload) -> Self {
        Self {
            id: MessageRef::Server(payload.id),
            from_user_id: payload.from_user_id,
            from_username: payload.from_username.unwrap_or_default(),
            to_user_id: payload.to_user_id,
            to_username: payload.to_username.unwrap_or_default(),
            text: payload.text,
            timestamp: payload.timestamp,
            provisional: false,
        }
    }
}
