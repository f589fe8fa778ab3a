use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use reqwest::Client;
use shared::protocol::ClientRequest;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use url::Url;

use super::{
    polling::{self, PollingLink},
    websocket::{self, WsStream},
    LinkEnd, TransportConnector, TransportEvent, TransportHandle, TransportMode, TransportSession,
};
use crate::{
    config::ClientConfig,
    credential::Credential,
    error::{ClientError, Result},
};

pub(crate) fn endpoint(base: &Url, suffix: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), suffix);
    url.set_path(&path);
    url.set_query(None);
    url
}

#[derive(Debug, Clone)]
struct SocketSettings {
    server_url: Url,
    transports: Vec<TransportMode>,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

pub struct SocketConnector {
    settings: SocketSettings,
    http: Client,
}

impl SocketConnector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let server_url = Url::parse(&config.server_url)
            .map_err(|err| ClientError::Config(format!("invalid server_url: {err}")))?;
        Ok(Self {
            settings: SocketSettings {
                server_url,
                transports: config.transports.clone(),
                reconnect_attempts: config.reconnect_attempts,
                reconnect_delay: config.reconnect_delay,
            },
            http: Client::new(),
        })
    }
}

impl TransportConnector for SocketConnector {
    fn open(&self, credential: Credential) -> TransportSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = SocketDriver {
            settings: self.settings.clone(),
            http: self.http.clone(),
            credential,
            commands: commands_rx,
            events: events_tx,
        };
        let task = tokio::spawn(driver.run());
        TransportSession {
            handle: Arc::new(SocketHandle {
                commands: commands_tx,
                driver: Mutex::new(Some(task)),
            }),
            events: events_rx,
        }
    }
}

struct SocketHandle {
    commands: mpsc::UnboundedSender<ClientRequest>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TransportHandle for SocketHandle {
    fn emit(&self, request: ClientRequest) -> Result<()> {
        self.commands
            .send(request)
            .map_err(|_| ClientError::Transport("transport is closed".into()))
    }

    fn close(&self) {
        let task = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.close();
    }
}

enum Link {
    WebSocket(WsStream),
    Polling(PollingLink),
}

struct SocketDriver {
    settings: SocketSettings,
    http: Client,
    credential: Credential,
    commands: mpsc::UnboundedReceiver<ClientRequest>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SocketDriver {
    async fn run(mut self) {
        let mut has_connected = false;
        let mut failed_reconnects = 0u32;
        loop {
            match self.establish().await {
                Ok((mode, link)) => {
                    failed_reconnects = 0;
                    let event = if has_connected {
                        TransportEvent::Reconnected { mode }
                    } else {
                        TransportEvent::Connected { mode }
                    };
                    has_connected = true;
                    if self.events.send(event).is_err() {
                        return;
                    }

                    let end = match link {
                        Link::WebSocket(stream) => {
                            websocket::run(stream, &mut self.commands, &self.events).await
                        }
                        Link::Polling(link) => link.run(&mut self.commands, &self.events).await,
                    };
                    match end {
                        LinkEnd::Released => return,
                        LinkEnd::Dropped(reason) => {
                            warn!(%mode, "transport: link dropped: {reason}");
                            if self
                                .events
                                .send(TransportEvent::Disconnected { reason })
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(reason) if !has_connected => {
                    let _ = self.events.send(TransportEvent::ConnectError(reason));
                    return;
                }
                Err(reason) => {
                    failed_reconnects += 1;
                    warn!(
                        attempt = failed_reconnects,
                        max_attempts = self.settings.reconnect_attempts,
                        "transport: reconnect failed: {reason}"
                    );
                }
            }

            if failed_reconnects >= self.settings.reconnect_attempts {
                info!("transport: reconnect attempts exhausted");
                return;
            }
            tokio::time::sleep(self.settings.reconnect_delay).await;
            if self.events.is_closed() {
                return;
            }
        }
    }

    async fn establish(&self) -> std::result::Result<(TransportMode, Link), String> {
        let mut failures = Vec::new();
        for mode in &self.settings.transports {
            let attempt = match mode {
                TransportMode::WebSocket => {
                    websocket::connect(&self.settings.server_url, &self.credential)
                        .await
                        .map(Link::WebSocket)
                }
                TransportMode::Polling => {
                    polling::connect(&self.http, &self.settings.server_url, &self.credential)
                        .await
                        .map(Link::Polling)
                }
            };
            match attempt {
                Ok(link) => {
                    if !failures.is_empty() {
                        info!(%mode, "transport: connected using fallback mode");
                    }
                    return Ok((*mode, link));
                }
                Err(err) => {
                    warn!(%mode, "transport: mode unavailable: {err}");
                    failures.push(err);
                }
            }
        }
        Err(failures.join("; "))
    }
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
