use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::sync::mpsc;

use crate::{
    credential::Credential,
    error::{ClientError, Result},
};

mod polling;
mod socket;
mod websocket;

pub use socket::SocketConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    WebSocket,
    Polling,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "polling" => Ok(Self::Polling),
            other => Err(ClientError::Config(format!("unknown transport mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { mode: TransportMode },
    /// The transport could not establish its first link; it is finished.
    ConnectError(String),
    /// An established link dropped. The transport may still reconnect.
    Disconnected { reason: String },
    Reconnected { mode: TransportMode },
    Inbound(ServerEvent),
}

pub trait TransportHandle: Send + Sync {
    fn emit(&self, request: ClientRequest) -> Result<()>;
    fn close(&self);
}

pub struct TransportSession {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub trait TransportConnector: Send + Sync {
    fn open(&self, credential: Credential) -> TransportSession;
}

#[derive(Debug)]
pub(crate) enum LinkEnd {
    Released,
    Dropped(String),
}
