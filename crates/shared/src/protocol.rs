use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, UserId},
    error::ApiError,
};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    SendMessage { to_user_id: UserId, message: String },
    GetChatHistory { other_user_id: UserId, limit: u32 },
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::GetChatHistory { .. } => "get_chat_history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub from_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_username: Option<String>,
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_username: Option<String>,
    #[serde(alias = "message")]
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(MessagePayload),
    MessageSent(MessagePayload),
    ChatHistory {
        other_user_id: UserId,
        messages: Vec<MessagePayload>,
    },
    Error(ApiError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::ChatHistory { .. } => "chat_history",
            Self::Error(_) => "error",
        }
    }
}
