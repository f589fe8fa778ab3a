use chrono::Utc;
use shared::domain::UserRef;
use tracing::debug;

use crate::types::{ChatMessage, MessageRef, TempId};

#[derive(Debug, Clone)]
pub struct ConversationView {
    self_user: UserRef,
    other_user: UserRef,
    messages: Vec<ChatMessage>,
}

impl ConversationView {
    pub fn new(self_user: UserRef, other_user: UserRef) -> Self {
        Self {
            self_user,
            other_user,
            messages: Vec::new(),
        }
    }

    pub fn self_user(&self) -> &UserRef {
        &self.self_user
    }

    pub fn other_user(&self) -> &UserRef {
        &self.other_user
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn provisional_count(&self) -> usize {
        self.messages.iter().filter(|m| m.provisional).count()
    }

    pub fn apply_history(&mut self, messages: Vec<ChatMessage>) {
        debug!(
            other_user_id = %self.other_user.id,
            count = messages.len(),
            "reconciler: history applied"
        );
        self.messages = messages;
    }

    pub fn apply_inbound(&mut self, message: ChatMessage) -> bool {
        if message.from_user_id != self.other_user.id {
            return false;
        }
        if let Some(id) = message.server_id() {
            if self.messages.iter().any(|m| m.server_id() == Some(id)) {
                debug!(message_id = %id, "reconciler: duplicate delivery ignored");
                return false;
            }
        }
        self.messages.push(message);
        true
    }

    pub fn apply_optimistic_send(
        &mut self,
        text: &str,
        self_user: &UserRef,
        other_user: &UserRef,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: MessageRef::Local(TempId::generate()),
            from_user_id: self_user.id,
            from_username: self_user.username.clone(),
            to_user_id: other_user.id,
            to_username: other_user.username.clone(),
            text: text.to_string(),
            timestamp: Utc::now(),
            provisional: true,
        };
        self.messages.push(message.clone());
        message
    }

    /// Rewrites the earliest provisional entry with the same text, sender and
    /// recipient as `confirmed`. Unmatched confirmations are ignored.
    pub fn apply_confirmation(&mut self, confirmed: &ChatMessage) -> bool {
        if let Some(id) = confirmed.server_id() {
            if self.messages.iter().any(|m| m.server_id() == Some(id)) {
                return false;
            }
        }
        let Some(entry) = self
            .messages
            .iter_mut()
            .find(|m| m.provisional && m.same_content(confirmed))
        else {
            debug!("reconciler: confirmation without provisional match");
            return false;
        };

        entry.id = confirmed.id.clone();
        entry.timestamp = confirmed.timestamp;
        entry.provisional = false;
        if !confirmed.from_username.is_empty() {
            entry.from_username = confirmed.from_username.clone();
        }
        if !confirmed.to_username.is_empty() {
            entry.to_username = confirmed.to_username.clone();
        }
        true
    }

    pub fn remove_optimistic(&mut self, temp_id: &TempId) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.provisional && m.temp_id() == Some(temp_id)));
        before != self.messages.len()
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
