//! Fixtures shared by the in-crate test modules.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::anyhow;
use chrono::{TimeZone, Utc};
use shared::{
    domain::{MessageId, UserId, UserRef},
    protocol::{ClientRequest, MessagePayload},
};
use tokio::sync::mpsc;

use crate::{
    credential::Credential,
    dispatcher::{ConnectionListener, MessageListener},
    error::{ClientError, Result},
    transport::{TransportConnector, TransportEvent, TransportHandle, TransportMode, TransportSession},
    types::ChatMessage,
};

pub(crate) fn alice() -> UserRef {
    UserRef::new(UserId(1), "alice")
}

pub(crate) fn bob() -> UserRef {
    UserRef::new(UserId(2), "bob")
}

pub(crate) fn payload(id: i64, from: &UserRef, to: &UserRef, text: &str) -> MessagePayload {
    MessagePayload {
        id: MessageId(id),
        from_user_id: from.id,
        from_username: Some(from.username.clone()),
        to_user_id: to.id,
        to_username: Some(to.username.clone()),
        text: text.to_string(),
        timestamp: Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
            + chrono::Duration::seconds(id),
    }
}

pub(crate) fn message(id: i64, from: &UserRef, to: &UserRef, text: &str) -> ChatMessage {
    ChatMessage::from(payload(id, from, to, text))
}

/// Lets spawned tasks on the current-thread test runtime catch up.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    pub received: Mutex<Vec<ChatMessage>>,
    pub confirmed: Mutex<Vec<ChatMessage>>,
}

impl RecordingListener {
    pub fn received_count(&self) -> usize {
        self.received.lock().map(|v| v.len()).unwrap_or_default()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.lock().map(|v| v.len()).unwrap_or_default()
    }
}

impl MessageListener for RecordingListener {
    fn on_message(&self, message: &ChatMessage) -> anyhow::Result<()> {
        self.received
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(message.clone());
        Ok(())
    }

    fn on_message_confirmed(&self, message: &ChatMessage) -> anyhow::Result<()> {
        self.confirmed
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct ConnectionRecorder {
    pub seen: Mutex<Vec<bool>>,
}

impl ConnectionRecorder {
    pub fn seen(&self) -> Vec<bool> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ConnectionListener for ConnectionRecorder {
    fn on_connection_changed(&self, connected: bool) -> anyhow::Result<()> {
        self.seen
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(connected);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockHandle {
    pub sent: Mutex<Vec<ClientRequest>>,
    pub closed: AtomicBool,
}

impl MockHandle {
    pub fn sent(&self) -> Vec<ClientRequest> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TransportHandle for MockHandle {
    fn emit(&self, request: ClientRequest) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Transport("transport is closed".into()));
        }
        self.sent
            .lock()
            .map_err(|_| ClientError::Transport("poisoned".into()))?
            .push(request);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpenBehavior {
    /// Reports `Connected` right away.
    Connect,
    /// Reports `ConnectError` right away.
    Fail(String),
    /// Reports nothing; the test drives the event stream by hand.
    Silent,
}

#[derive(Clone)]
pub(crate) struct MockLink {
    pub token: String,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub handle: Arc<MockHandle>,
}

impl MockLink {
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

pub(crate) struct MockConnector {
    behavior: Mutex<OpenBehavior>,
    links: Mutex<Vec<MockLink>>,
}

impl MockConnector {
    pub fn new(behavior: OpenBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        if let Ok(mut guard) = self.behavior.lock() {
            *guard = behavior;
        }
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().map(|v| v.len()).unwrap_or_default()
    }

    pub fn link(&self, index: usize) -> MockLink {
        self.links.lock().expect("links")[index].clone()
    }

    pub fn last_link(&self) -> MockLink {
        self.links
            .lock()
            .expect("links")
            .last()
            .cloned()
            .expect("at least one transport opened")
    }
}

impl TransportConnector for MockConnector {
    fn open(&self, credential: Credential) -> TransportSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let behavior = self.behavior.lock().expect("behavior").clone();
        match behavior {
            OpenBehavior::Connect => {
                let _ = events_tx.send(TransportEvent::Connected {
                    mode: TransportMode::WebSocket,
                });
            }
            OpenBehavior::Fail(reason) => {
                let _ = events_tx.send(TransportEvent::ConnectError(reason));
            }
            OpenBehavior::Silent => {}
        }
        let handle = Arc::new(MockHandle::default());
        self.links.lock().expect("links").push(MockLink {
            token: credential.expose().to_string(),
            events: events_tx,
            handle: Arc::clone(&handle),
        });
        TransportSession {
            handle,
            events: events_rx,
        }
    }
}
