use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::domain::UserRef;
use tracing::{info, warn};

use crate::{
    dispatcher::MessageListener,
    error::Result,
    reconciler::ConversationView,
    types::ChatMessage,
    validate_message_text, ClientHandle, RealtimeClient,
};

struct ViewListener {
    view: Arc<Mutex<ConversationView>>,
}

impl MessageListener for ViewListener {
    fn on_message(&self, message: &ChatMessage) -> anyhow::Result<()> {
        lock(&self.view).apply_inbound(message.clone());
        Ok(())
    }

    fn on_message_confirmed(&self, message: &ChatMessage) -> anyhow::Result<()> {
        lock(&self.view).apply_confirmation(message);
        Ok(())
    }
}

pub struct ConversationSession {
    client: Arc<RealtimeClient>,
    view: Arc<Mutex<ConversationView>>,
    listener: Arc<dyn MessageListener>,
}

impl ConversationSession {
    pub async fn open(
        client: Arc<RealtimeClient>,
        self_user: UserRef,
        other_user: UserRef,
    ) -> Result<Self> {
        let other_user_id = other_user.id;
        let view = Arc::new(Mutex::new(ConversationView::new(self_user, other_user)));
        let listener: Arc<dyn MessageListener> = Arc::new(ViewListener {
            view: Arc::clone(&view),
        });
        client.add_message_listener(Arc::clone(&listener));
        let session = Self {
            client,
            view,
            listener,
        };

        let history = session.client.get_chat_history(other_user_id, None).await?;
        info!(
            other_user_id = %other_user_id,
            count = history.len(),
            "conversation: opened"
        );
        lock(&session.view).apply_history(history);
        Ok(session)
    }

    pub async fn send(&self, text: &str) -> Result<ChatMessage> {
        validate_message_text(text)?;
        let (provisional, other_user_id) = {
            let mut view = lock(&self.view);
            let self_user = view.self_user().clone();
            let other_user = view.other_user().clone();
            (
                view.apply_optimistic_send(text, &self_user, &other_user),
                other_user.id,
            )
        };

        if let Err(err) = self.client.send_message(other_user_id, text).await {
            warn!(other_user_id = %other_user_id, "conversation: send failed: {err}");
            if let Some(temp_id) = provisional.temp_id() {
                lock(&self.view).remove_optimistic(temp_id);
            }
            return Err(err);
        }
        Ok(provisional)
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        lock(&self.view).messages().to_vec()
    }

    pub fn other_user(&self) -> UserRef {
        lock(&self.view).other_user().clone()
    }

    pub fn close(self) {}
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.client.remove_message_listener(&self.listener);
    }
}

fn lock(view: &Mutex<ConversationView>) -> MutexGuard<'_, ConversationView> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
