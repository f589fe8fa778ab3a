use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use shared::protocol::ServerEvent;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::types::ChatMessage;

pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &ChatMessage) -> anyhow::Result<()>;

    fn on_message_confirmed(&self, _message: &ChatMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> MessageListener for F
where
    F: Fn(&ChatMessage) -> anyhow::Result<()> + Send + Sync,
{
    fn on_message(&self, message: &ChatMessage) -> anyhow::Result<()> {
        self(message)
    }
}

pub trait ConnectionListener: Send + Sync {
    fn on_connection_changed(&self, connected: bool) -> anyhow::Result<()>;
}

impl<F> ConnectionListener for F
where
    F: Fn(bool) -> anyhow::Result<()> + Send + Sync,
{
    fn on_connection_changed(&self, connected: bool) -> anyhow::Result<()> {
        self(connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageReceived(ChatMessage),
    MessageConfirmed(ChatMessage),
    ConnectionChanged(bool),
    ServerError(String),
}

pub struct EventDispatcher {
    message_listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
    connection_listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            message_listeners: RwLock::new(Vec::new()),
            connection_listeners: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        insert_unique(&self.message_listeners, listener)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        remove_by_identity(&self.message_listeners, listener)
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        insert_unique(&self.connection_listeners, listener)
    }

    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        remove_by_identity(&self.connection_listeners, listener)
    }

    pub fn message_listener_count(&self) -> usize {
        read(&self.message_listeners).len()
    }

    pub fn connection_listener_count(&self) -> usize {
        read(&self.connection_listeners).len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn dispatch_server_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(payload) => {
                self.dispatch_message(&ChatMessage::from(payload.clone()));
            }
            ServerEvent::MessageSent(payload) => {
                self.dispatch_confirmation(&ChatMessage::from(payload.clone()));
            }
            ServerEvent::Error(err) => {
                let _ = self
                    .events
                    .send(ClientEvent::ServerError(err.message_or_default().to_string()));
            }
            ServerEvent::ChatHistory { .. } => {}
        }
    }

    pub fn dispatch_message(&self, message: &ChatMessage) {
        let listeners = read(&self.message_listeners);
        debug!(listeners = listeners.len(), "dispatch: inbound message");
        for listener in &listeners {
            invoke("message", || listener.on_message(message));
        }
        let _ = self.events.send(ClientEvent::MessageReceived(message.clone()));
    }

    pub fn dispatch_confirmation(&self, message: &ChatMessage) {
        let listeners = read(&self.message_listeners);
        debug!(listeners = listeners.len(), "dispatch: message confirmed");
        for listener in &listeners {
            invoke("message_confirmed", || listener.on_message_confirmed(message));
        }
        let _ = self.events.send(ClientEvent::MessageConfirmed(message.clone()));
    }

    pub fn dispatch_connection(&self, connected: bool) {
        let listeners = read(&self.connection_listeners);
        debug!(listeners = listeners.len(), connected, "dispatch: connection state");
        for listener in &listeners {
            invoke("connection", || listener.on_connection_changed(connected));
        }
        let _ = self.events.send(ClientEvent::ConnectionChanged(connected));
    }
}

fn invoke(kind: &'static str, call: impl FnOnce() -> anyhow::Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(listener = kind, "dispatch: listener failed: {err:#}"),
        Err(_) => error!(listener = kind, "dispatch: listener panicked"),
    }
}

fn read<T: ?Sized>(set: &RwLock<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    set.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn insert_unique<T: ?Sized>(set: &RwLock<Vec<Arc<T>>>, listener: Arc<T>) -> bool {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    if guard.iter().any(|existing| same_listener(existing, &listener)) {
        return false;
    }
    guard.push(listener);
    true
}

fn remove_by_identity<T: ?Sized>(set: &RwLock<Vec<Arc<T>>>, listener: &Arc<T>) -> bool {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    let before = guard.len();
    guard.retain(|existing| !same_listener(existing, listener));
    before != guard.len()
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
