use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use shared::{
    domain::UserId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

pub trait EventSink: Send + Sync {
    fn emit(&self, request: ClientRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    ChatHistory { other_user_id: UserId },
}

impl CorrelationKey {
    fn matches(&self, event: &ServerEvent) -> bool {
        match (self, event) {
            (
                Self::ChatHistory { other_user_id },
                ServerEvent::ChatHistory {
                    other_user_id: responded_for,
                    ..
                },
            ) => other_user_id == responded_for,
            _ => false,
        }
    }
}

type Settlement = Result<ServerEvent>;

struct PendingRequest {
    key: CorrelationKey,
    created_at: Instant,
    timer: JoinHandle<()>,
    waiters: Vec<oneshot::Sender<Settlement>>,
}

impl PendingRequest {
    fn notify(waiters: Vec<oneshot::Sender<Settlement>>, outcome: Settlement) {
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

type PendingTable = Arc<Mutex<BTreeMap<u64, PendingRequest>>>;

pub struct RequestCorrelator {
    timeout: Duration,
    next_id: AtomicU64,
    pending: PendingTable,
}

impl RequestCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub async fn request(
        &self,
        sink: &dyn EventSink,
        key: CorrelationKey,
        request: ClientRequest,
    ) -> Result<ServerEvent> {
        let (tx, rx) = oneshot::channel();
        let issued = {
            let mut pending = lock(&self.pending);
            match pending.iter_mut().find(|(_, entry)| entry.key == key) {
                Some((id, entry)) => {
                    debug!(request_id = *id, ?key, "correlator: joining in-flight request");
                    entry.waiters.push(tx);
                    None
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let timer = self.spawn_timer(id);
                    pending.insert(
                        id,
                        PendingRequest {
                            key: key.clone(),
                            created_at: Instant::now(),
                            timer,
                            waiters: vec![tx],
                        },
                    );
                    Some(id)
                }
            }
        };

        if let Some(id) = issued {
            debug!(request_id = id, event = request.name(), "correlator: request issued");
            if let Err(err) = sink.emit(request) {
                self.settle(id, Err(err));
            }
        }

        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    pub fn route(&self, event: &ServerEvent) -> bool {
        if let ServerEvent::Error(err) = event {
            let message = err.message_or_default().to_string();
            let settled = self.settle_all(ClientError::Server(message.clone()));
            if settled > 0 {
                warn!(settled, "correlator: server error settled pending requests: {message}");
            }
            return settled > 0;
        }

        let matched = lock(&self.pending)
            .iter()
            .find(|(_, entry)| entry.key.matches(event))
            .map(|(id, _)| *id);
        match matched {
            Some(id) => self.settle(id, Ok(event.clone())),
            None => false,
        }
    }

    pub fn fail_all(&self, err: ClientError) -> usize {
        self.settle_all(err)
    }

    // Response, error event and timer race to remove the entry; only the
    // winner notifies, so each request settles at most once.
    fn settle(&self, id: u64, outcome: Settlement) -> bool {
        let Some(entry) = lock(&self.pending).remove(&id) else {
            return false;
        };
        entry.timer.abort();
        debug!(
            request_id = id,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "correlator: request settled"
        );
        PendingRequest::notify(entry.waiters, outcome);
        true
    }

    fn settle_all(&self, err: ClientError) -> usize {
        let drained = std::mem::take(&mut *lock(&self.pending));
        let count = drained.len();
        for (_, entry) in drained {
            entry.timer.abort();
            PendingRequest::notify(entry.waiters, Err(err.clone()));
        }
        count
    }

    fn spawn_timer(&self, id: u64) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = lock(&pending).remove(&id);
            if let Some(entry) = expired {
                info!(
                    request_id = id,
                    timeout_ms = timeout.as_millis() as u64,
                    "correlator: request timed out"
                );
                PendingRequest::notify(entry.waiters, Err(ClientError::RequestTimeout));
            }
        })
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        for (_, entry) in std::mem::take(&mut *lock(&self.pending)) {
            entry.timer.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/correlator_tests.rs"]
mod tests;
