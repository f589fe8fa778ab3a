use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("no stored credential; sign in before connecting")]
    NoCredential,
    #[error("timed out waiting for the connection to be established")]
    ConnectTimeout,
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("not connected to the message server")]
    NotConnected,
    #[error("timed out waiting for a response from the message server")]
    RequestTimeout,
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("connection closed before the request settled")]
    ConnectionClosed,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout
                | Self::Connect(_)
                | Self::RequestTimeout
                | Self::ConnectionClosed
                | Self::Transport(_)
        )
    }
}
