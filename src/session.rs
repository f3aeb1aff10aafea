use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::DropPolicy;
use crate::types::{ProgressEvent, ScanResult};

pub type SessionId = String;

/// Fresh, collision-resistant session identifier.
pub fn new_session_id() -> SessionId {
    Uuid::new_v4().to_string()
}

/// Bounded, non-blocking progress queue shared between scan workers and its consumers.
///
/// `offer` never waits. With [`DropPolicy::DropNewest`] a full queue rejects the new
/// event (`mpsc::Sender::try_send`); with [`DropPolicy::DropOldest`] the queue is a
/// `broadcast` ring that overwrites the oldest event and the reader skips the gap.
#[derive(Clone, Debug)]
pub struct ProgressChannel {
    tx: ProgressSender,
    rx: Arc<Mutex<ProgressReceiver>>,
}

#[derive(Clone, Debug)]
enum ProgressSender {
    Newest(mpsc::Sender<ProgressEvent>),
    Oldest(broadcast::Sender<ProgressEvent>),
}

#[derive(Debug)]
enum ProgressReceiver {
    Newest(mpsc::Receiver<ProgressEvent>),
    Oldest(broadcast::Receiver<ProgressEvent>),
}

impl ProgressReceiver {
    async fn recv(&mut self) -> Option<ProgressEvent> {
        match self {
            ProgressReceiver::Newest(rx) => rx.recv().await,
            ProgressReceiver::Oldest(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "progress reader lagged, oldest events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }

    fn try_recv(&mut self) -> Option<ProgressEvent> {
        match self {
            ProgressReceiver::Newest(rx) => rx.try_recv().ok(),
            ProgressReceiver::Oldest(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => return None,
                }
            },
        }
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = match policy {
            DropPolicy::DropNewest => {
                let (tx, rx) = mpsc::channel(capacity);
                (ProgressSender::Newest(tx), ProgressReceiver::Newest(rx))
            }
            DropPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (ProgressSender::Oldest(tx), ProgressReceiver::Oldest(rx))
            }
        };
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Queue an event without waiting. Returns `false` if this event was dropped.
    pub fn offer(&self, event: ProgressEvent) -> bool {
        let accepted = match &self.tx {
            ProgressSender::Newest(tx) => tx.try_send(event).is_ok(),
            ProgressSender::Oldest(tx) => tx.send(event).is_ok(),
        };
        if !accepted {
            debug!("progress queue full, dropping event");
        }
        accepted
    }

    /// Next queued event, if one is ready and no other reader holds the queue.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.rx.try_lock().ok()?.try_recv()
    }

    /// Wait for the next event. Concurrent readers take turns.
    pub async fn recv(&self) -> Option<ProgressEvent> {
        self.rx.lock().await.recv().await
    }
}

/// One scan's progress queue, results and bookkeeping.
#[derive(Debug)]
pub struct ScanSession {
    id: SessionId,
    progress: ProgressChannel,
    results: RwLock<Vec<ScanResult>>,
    started_at: OffsetDateTime,
    finished: AtomicBool,
    cancel: CancellationToken,
}

impl ScanSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Cancelled when the store is torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot of the results recorded so far.
    pub async fn results(&self) -> Vec<ScanResult> {
        self.results.read().await.clone()
    }

    /// Record the final results and mark the scan finished.
    pub async fn finish(&self, results: Vec<ScanResult>) {
        *self.results.write().await = results;
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Process-wide registry of scan sessions.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Debug)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<ScanSession>>>>,
    shutdown: CancellationToken,
    capacity: usize,
    policy: DropPolicy,
}

impl SessionStore {
    pub fn new(progress_capacity: usize, policy: DropPolicy) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            capacity: progress_capacity,
            policy,
        }
    }

    /// Insert a fresh session under `id`, replacing any previous one.
    pub async fn create(&self, id: SessionId) -> Arc<ScanSession> {
        let session = Arc::new(ScanSession {
            id: id.clone(),
            progress: ProgressChannel::new(self.capacity, self.policy),
            results: RwLock::new(Vec::new()),
            started_at: OffsetDateTime::now_utc(),
            finished: AtomicBool::new(false),
            cancel: self.shutdown.child_token(),
        });
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ScanSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delete `id` once `grace` has elapsed, unless the store is torn down first.
    pub fn schedule_removal(&self, id: SessionId, grace: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = store.shutdown.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    store.delete(&id).await;
                    debug!(session = %id, ?grace, "session expired");
                }
            }
        });
    }

    /// Cancel every live scan and pending removal, then drop all sessions.
    pub async fn teardown(&self) {
        self.shutdown.cancel();
        let mut sessions = self.sessions.write().await;
        debug!(count = sessions.len(), "tearing down sessions");
        sessions.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
