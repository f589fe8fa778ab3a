use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use shared::protocol::DEFAULT_HISTORY_LIMIT;
use url::Url;

use crate::{
    error::{ClientError, Result},
    transport::TransportMode,
};

pub const DEFAULT_CONFIG_FILE: &str = "chat_client.toml";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub history_limit: u32,
    pub transports: Vec<TransportMode>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            transports: vec![TransportMode::WebSocket, TransportMode::Polling],
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    history_limit: Option<u32>,
    transports: Option<Vec<TransportMode>>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    event_buffer: Option<usize>,
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(raw) => config.apply_toml(&raw)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(ClientError::Config(format!(
                    "failed to read '{}': {err}",
                    path.display()
                )))
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub(crate) fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file_cfg: FileConfig = toml::from_str(raw)
            .map_err(|err| ClientError::Config(format!("invalid config file: {err}")))?;

        if let Some(v) = file_cfg.server_url {
            self.server_url = v;
        }
        if let Some(v) = file_cfg.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.history_limit {
            self.history_limit = v;
        }
        if let Some(v) = file_cfg.transports {
            self.transports = v;
        }
        if let Some(v) = file_cfg.reconnect_attempts {
            self.reconnect_attempts = v;
        }
        if let Some(v) = file_cfg.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.event_buffer {
            self.event_buffer = v;
        }
        Ok(())
    }

    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CHAT_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("CHAT_CONNECT_TIMEOUT_MS") {
            self.connect_timeout = Duration::from_millis(parse_env("CHAT_CONNECT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("CHAT_REQUEST_TIMEOUT_MS") {
            self.request_timeout = Duration::from_millis(parse_env("CHAT_REQUEST_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("CHAT_TRANSPORTS") {
            self.transports = v
                .split(',')
                .map(str::trim)
                .filter(|mode| !mode.is_empty())
                .map(|mode| mode.parse::<TransportMode>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = lookup("CHAT_RECONNECT_ATTEMPTS") {
            self.reconnect_attempts = parse_env("CHAT_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("CHAT_RECONNECT_DELAY_MS") {
            self.reconnect_delay = Duration::from_millis(parse_env("CHAT_RECONNECT_DELAY_MS", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url).map_err(|err| {
            ClientError::Config(format!("invalid server_url '{}': {err}", self.server_url))
        })?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ClientError::Config(format!(
                "server_url must use http, https, ws or wss, got '{}'",
                url.scheme()
            )));
        }
        if self.transports.is_empty() {
            return Err(ClientError::Config("at least one transport is required".into()));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ClientError::Config("timeouts must be non-zero".into()));
        }
        if self.history_limit == 0 {
            return Err(ClientError::Config("history_limit must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(ClientError::Config("event_buffer must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ClientError::Config(format!("{key} has an invalid value '{raw}'")))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
