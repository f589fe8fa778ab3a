use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{UserId, MAX_MESSAGE_CHARS},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub mod config;
pub mod connection;
pub mod conversation;
pub mod correlator;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod transport;
pub mod types;

pub use config::ClientConfig;
pub use connection::ConnectionManager;
pub use conversation::ConversationSession;
pub use correlator::{CorrelationKey, EventSink, RequestCorrelator};
pub use credential::{Credential, CredentialStore, EnvCredentialStore, MemoryCredentialStore};
pub use dispatcher::{ClientEvent, ConnectionListener, EventDispatcher, MessageListener};
pub use error::{ClientError, Result};
pub use reconciler::ConversationView;
pub use transport::{SocketConnector, TransportConnector, TransportMode};
pub use types::{ChatMessage, ConnectionState, MessageRef, TempId};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);
    async fn force_reconnect(&self) -> Result<()>;
    fn connection_status(&self) -> bool;
    async fn send_message(&self, to_user_id: UserId, text: &str) -> Result<()>;
    async fn get_chat_history(
        &self,
        other_user_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

pub struct RealtimeClient {
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
    correlator: Arc<RequestCorrelator>,
    connection: Arc<ConnectionManager>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Arc<Self>> {
        let connector = Arc::new(SocketConnector::new(&config)?);
        Ok(Self::new_with_dependencies(config, credentials, connector))
    }

    pub fn new_with_dependencies(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(EventDispatcher::new(config.event_buffer));
        let correlator = Arc::new(RequestCorrelator::new(config.request_timeout));
        let connection = Arc::new(ConnectionManager::new(
            credentials,
            connector,
            Arc::clone(&dispatcher),
            Arc::clone(&correlator),
            config.connect_timeout,
        ));
        Arc::new(Self {
            config,
            dispatcher,
            correlator,
            connection,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        self.dispatcher.add_message_listener(listener)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.dispatcher.remove_message_listener(listener)
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.dispatcher.add_connection_listener(listener)
    }

    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.dispatcher.remove_connection_listener(listener)
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }
}

fn validate_message_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ClientError::InvalidMessage("message text is empty".into()));
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(ClientError::InvalidMessage(format!(
            "message is {chars} characters; the limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(())
}

#[async_trait]
impl ClientHandle for RealtimeClient {
    async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    async fn disconnect(&self) {
        self.connection.disconnect();
    }

    async fn force_reconnect(&self) -> Result<()> {
        info!("client: forcing reconnect");
        self.connection.force_reconnect().await
    }

    fn connection_status(&self) -> bool {
        self.connection.connection_status()
    }

    async fn send_message(&self, to_user_id: UserId, text: &str) -> Result<()> {
        validate_message_text(text)?;
        if !self.connection.connection_status() {
            return Err(ClientError::NotConnected);
        }
        debug!(to_user_id = %to_user_id, "client: sending message");
        self.connection.emit(ClientRequest::SendMessage {
            to_user_id,
            message: text.to_string(),
        })
    }

    async fn get_chat_history(
        &self,
        other_user_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>> {
        let limit = limit.unwrap_or(self.config.history_limit);
        let response = self
            .correlator
            .request(
                self.connection.as_ref(),
                CorrelationKey::ChatHistory { other_user_id },
                ClientRequest::GetChatHistory {
                    other_user_id,
                    limit,
                },
            )
            .await?;
        match response {
            ServerEvent::ChatHistory { messages, .. } => {
                debug!(
                    other_user_id = %other_user_id,
                    count = messages.len(),
                    "client: history received"
                );
                Ok(messages.into_iter().map(ChatMessage::from).collect())
            }
            other => Err(ClientError::Transport(format!(
                "unexpected '{}' response to a history request",
                other.name()
            ))),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.dispatcher.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
