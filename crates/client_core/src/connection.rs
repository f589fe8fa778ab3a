use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::protocol::ClientRequest;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    correlator::{EventSink, RequestCorrelator},
    credential::CredentialStore,
    dispatcher::EventDispatcher,
    error::{ClientError, Result},
    transport::{TransportConnector, TransportEvent, TransportHandle, TransportMode},
    types::ConnectionState,
};

#[derive(Debug, Clone)]
enum AttemptStatus {
    Pending,
    Settled(Result<()>),
}

// A transport runs under the generation it was opened with. Disconnect and
// replacement bump the generation, after which the old pump stops at its next
// event without touching state.
struct ActiveTransport {
    generation: u64,
    handle: Arc<dyn TransportHandle>,
    pump: JoinHandle<()>,
}

impl ActiveTransport {
    fn teardown(self) {
        self.pump.abort();
        self.handle.close();
    }
}

struct ConnectionInner {
    state: ConnectionState,
    generation: u64,
    transport: Option<ActiveTransport>,
    attempt: Option<watch::Sender<AttemptStatus>>,
}

impl ConnectionInner {
    fn settle_attempt(&mut self, outcome: Result<()>) {
        if let Some(attempt) = self.attempt.take() {
            let _ = attempt.send(AttemptStatus::Settled(outcome));
        }
    }
}

struct Shared {
    inner: Mutex<ConnectionInner>,
    dispatcher: Arc<EventDispatcher>,
    correlator: Arc<RequestCorrelator>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when `generation` is stale and the pump should stop.
    fn mark_connected(&self, generation: u64, mode: TransportMode, reconnected: bool) -> bool {
        let changed = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            let changed = inner.state != ConnectionState::Connected;
            inner.state = ConnectionState::Connected;
            inner.settle_attempt(Ok(()));
            changed
        };
        if reconnected {
            info!(generation, %mode, "connection: transport reconnected");
        } else {
            info!(generation, %mode, "connection: established");
        }
        if changed {
            self.dispatcher.dispatch_connection(true);
        }
        true
    }

    /// Returns `false` when `generation` is stale and the pump should stop.
    fn mark_disconnected(&self, generation: u64, reason: &str) -> bool {
        let changed = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            let changed = inner.state != ConnectionState::Disconnected;
            inner.state = ConnectionState::Disconnected;
            changed
        };
        warn!(generation, "connection: transport disconnected: {reason}");
        if changed {
            self.dispatcher.dispatch_connection(false);
        }
        true
    }

    fn fail_attempt(&self, generation: u64, err: ClientError) {
        let notify = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            let had_transport = match inner.transport.take() {
                Some(transport) => {
                    transport.handle.close();
                    true
                }
                None => false,
            };
            let notify = had_transport && inner.state != ConnectionState::Disconnected;
            inner.state = ConnectionState::Disconnected;
            inner.settle_attempt(Err(err.clone()));
            notify
        };
        warn!(generation, "connection: connect attempt failed: {err}");
        if notify {
            self.dispatcher.dispatch_connection(false);
        }
    }

    fn release(&self, generation: u64) {
        let notify = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            if let Some(transport) = inner.transport.take() {
                transport.handle.close();
            }
            let notify = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            notify
        };
        info!(generation, "connection: transport finished");
        if notify {
            self.dispatcher.dispatch_connection(false);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }
}

enum Reservation {
    Connected,
    Join(watch::Receiver<AttemptStatus>),
    Start {
        generation: u64,
        previous: ConnectionState,
        status: watch::Receiver<AttemptStatus>,
    },
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn TransportConnector>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn TransportConnector>,
        dispatcher: Arc<EventDispatcher>,
        correlator: Arc<RequestCorrelator>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(ConnectionInner {
                    state: ConnectionState::Idle,
                    generation: 0,
                    transport: None,
                    attempt: None,
                }),
                dispatcher,
                correlator,
            }),
            credentials,
            connector,
            connect_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn connection_status(&self) -> bool {
        self.state().is_connected()
    }

    pub async fn connect(&self) -> Result<()> {
        let reservation = {
            let mut inner = self.shared.lock();
            if inner.state == ConnectionState::Connected && inner.transport.is_some() {
                Reservation::Connected
            } else if let Some(attempt) = &inner.attempt {
                Reservation::Join(attempt.subscribe())
            } else {
                let (tx, rx) = watch::channel(AttemptStatus::Pending);
                let previous = inner.state;
                inner.state = ConnectionState::Connecting;
                inner.attempt = Some(tx);
                Reservation::Start {
                    generation: inner.generation,
                    previous,
                    status: rx,
                }
            }
        };

        match reservation {
            Reservation::Connected => Ok(()),
            Reservation::Join(status) => {
                debug!("connection: joining in-flight connect attempt");
                wait_for_attempt(status).await
            }
            Reservation::Start {
                generation,
                previous,
                status,
            } => {
                let deadline = Instant::now() + self.connect_timeout;
                self.open_transport(generation, previous, deadline).await;
                wait_for_attempt(status).await
            }
        }
    }

    async fn open_transport(
        &self,
        reserved_generation: u64,
        previous: ConnectionState,
        deadline: Instant,
    ) {
        let credential =
            tokio::time::timeout_at(deadline, self.credentials.credential()).await;

        let mut inner = self.shared.lock();
        if inner.generation != reserved_generation || inner.attempt.is_none() {
            debug!("connection: connect attempt superseded before opening a transport");
            return;
        }
        let Ok(credential) = credential else {
            warn!("connection: credential store did not answer before the connect deadline");
            inner.state = previous;
            inner.settle_attempt(Err(ClientError::ConnectTimeout));
            return;
        };
        if inner.state == ConnectionState::Connected {
            // A stale transport recovered on its own while the credential was read.
            inner.settle_attempt(Ok(()));
            return;
        }
        let Some(credential) = credential else {
            warn!("connection: no stored credential");
            inner.state = previous;
            inner.settle_attempt(Err(ClientError::NoCredential));
            return;
        };

        if let Some(stale) = inner.transport.take() {
            info!(
                stale_generation = stale.generation,
                "connection: tearing down stale transport"
            );
            stale.teardown();
        }

        inner.generation += 1;
        let generation = inner.generation;
        info!(generation, "connection: connecting");
        let session = self.connector.open(credential);
        let pump = tokio::spawn(pump(
            Arc::clone(&self.shared),
            generation,
            session.events,
            deadline,
        ));
        inner.transport = Some(ActiveTransport {
            generation,
            handle: session.handle,
            pump,
        });
    }

    pub fn disconnect(&self) {
        let notify = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            let transport = inner.transport.take();
            let had_transport = transport.is_some();
            if let Some(transport) = transport {
                info!(generation = transport.generation, "connection: disconnecting");
                transport.teardown();
            }
            inner.settle_attempt(Err(ClientError::Connect(
                "connection attempt abandoned by disconnect".into(),
            )));
            let notify = had_transport && inner.state != ConnectionState::Disconnected;
            inner.state = ConnectionState::Disconnected;
            notify
        };

        let abandoned = self.shared.correlator.fail_all(ClientError::ConnectionClosed);
        if abandoned > 0 {
            debug!(abandoned, "connection: pending requests abandoned by disconnect");
        }
        if notify {
            self.shared.dispatcher.dispatch_connection(false);
        }
    }

    pub async fn force_reconnect(&self) -> Result<()> {
        self.disconnect();
        self.connect().await
    }

    pub fn emit(&self, request: ClientRequest) -> Result<()> {
        let handle = {
            let inner = self.shared.lock();
            match (&inner.transport, inner.state) {
                (Some(transport), ConnectionState::Connected) => Arc::clone(&transport.handle),
                _ => return Err(ClientError::NotConnected),
            }
        };
        handle.emit(request)
    }
}

impl EventSink for ConnectionManager {
    fn emit(&self, request: ClientRequest) -> Result<()> {
        ConnectionManager::emit(self, request)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(transport) = inner.transport.take() {
            transport.teardown();
        }
    }
}

async fn wait_for_attempt(mut status: watch::Receiver<AttemptStatus>) -> Result<()> {
    let abandoned = || ClientError::Connect("connection attempt abandoned".into());
    match status
        .wait_for(|status| matches!(status, AttemptStatus::Settled(_)))
        .await
    {
        Ok(settled) => match &*settled {
            AttemptStatus::Settled(outcome) => outcome.clone(),
            AttemptStatus::Pending => Err(abandoned()),
        },
        Err(_) => Err(abandoned()),
    }
}

async fn pump(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    deadline: Instant,
) {
    let deadline = tokio::time::sleep_until(deadline);
    tokio::pin!(deadline);
    let mut awaiting_connect = true;

    loop {
        tokio::select! {
            _ = &mut deadline, if awaiting_connect => {
                shared.fail_attempt(generation, ClientError::ConnectTimeout);
                return;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    if awaiting_connect {
                        shared.fail_attempt(
                            generation,
                            ClientError::Connect("transport closed before connecting".into()),
                        );
                    } else {
                        shared.release(generation);
                    }
                    return;
                };
                let keep_going = match event {
                    TransportEvent::Connected { mode } => {
                        awaiting_connect = false;
                        shared.mark_connected(generation, mode, false)
                    }
                    TransportEvent::Reconnected { mode } => {
                        awaiting_connect = false;
                        shared.mark_connected(generation, mode, true)
                    }
                    TransportEvent::ConnectError(reason) if awaiting_connect => {
                        shared.fail_attempt(generation, ClientError::Connect(reason));
                        return;
                    }
                    TransportEvent::ConnectError(reason)
                    | TransportEvent::Disconnected { reason } => {
                        shared.mark_disconnected(generation, &reason)
                    }
                    TransportEvent::Inbound(event) => {
                        if shared.is_current(generation) {
                            debug!(generation, event = event.name(), "connection: inbound event");
                            shared.correlator.route(&event);
                            shared.dispatcher.dispatch_server_event(&event);
                            true
                        } else {
                            false
                        }
                    }
                };
                if !keep_going {
                    debug!(generation, "connection: stale pump stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
