use std::net::IpAddr;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::batch::scan_in_batches;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::scanner::ScanContext;
use crate::session::{new_session_id, ScanSession, SessionId, SessionStore};
use crate::types::{ports_per_second, Port, ProgressEvent, ScanResult};

/// Entry point for starting scans and observing them.
///
/// Owns the session registry; clone it to share between the HTTP layer and
/// background tasks.
#[derive(Clone, Debug)]
pub struct ScanService {
    config: Arc<ScanConfig>,
    store: SessionStore,
}

impl ScanService {
    pub fn new(config: ScanConfig) -> Self {
        let store = SessionStore::new(config.progress_capacity, config.drop_policy);
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session and scan `ports` on `host` in the background.
    ///
    /// Returns as soon as the session exists. The dial timeout follows the configured
    /// tier for the request size.
    pub async fn start_scan(&self, host: IpAddr, ports: Vec<Port>) -> Result<SessionId, ScanError> {
        if ports.is_empty() {
            return Err(ScanError::NoPorts);
        }

        let id = new_session_id();
        let session = self.store.create(id.clone()).await;
        info!(session = %id, %host, ports = ports.len(), "scan session created");

        let service = self.clone();
        tokio::spawn(async move {
            service.orchestrate(session, host, ports).await;
        });
        Ok(id)
    }

    /// Results recorded for a session so far; empty while the scan is still running.
    pub async fn poll_results(&self, id: &str) -> Result<Vec<ScanResult>, ScanError> {
        Ok(self.session(id).await?.results().await)
    }

    pub async fn session(&self, id: &str) -> Result<Arc<ScanSession>, ScanError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| ScanError::SessionNotFound(id.to_string()))
    }

    /// Live progress of a session.
    ///
    /// The stream ends after yielding the "complete" event, after the configured idle
    /// timeout passes without an event, or when the service is torn down.
    pub async fn stream_progress(
        &self,
        id: &str,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static, ScanError> {
        let session = self.session(id).await?;
        let idle = self.config.stream_idle_timeout;
        let channel = session.progress().clone();
        let cancel = session.cancel_token().clone();
        let id = id.to_string();

        Ok(stream::unfold(false, move |finished| {
            let channel = channel.clone();
            let cancel = cancel.clone();
            let id = id.clone();
            async move {
                if finished {
                    return None;
                }
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = time::timeout(idle, channel.recv()) => match next {
                        Ok(None) => None,
                        Ok(Some(event)) => {
                            let done = event.is_complete();
                            if done {
                                debug!(session = %id, "progress stream complete");
                            }
                            Some((event, done))
                        }
                        Err(_) => {
                            debug!(session = %id, ?idle, "progress stream idle timeout");
                            None
                        }
                    },
                }
            }
        }))
    }

    /// Scan without a session or progress reporting, waiting for the results.
    pub async fn scan_blocking(&self, host: IpAddr, ports: &[Port]) -> Vec<ScanResult> {
        let ctx = ScanContext::new(host, self.config.dial_timeout.pick(ports.len()));
        scan_in_batches(&ctx, ports, &self.config).await
    }

    /// Cancel running scans and drop every session.
    pub async fn teardown(&self) {
        info!("shutting down scan service");
        self.store.teardown().await;
    }

    async fn orchestrate(&self, session: Arc<ScanSession>, host: IpAddr, ports: Vec<Port>) {
        let total = ports.len();
        let id = session.id().to_string();
        let ctx = ScanContext::new(host, self.config.dial_timeout.pick(total))
            .with_progress(session.progress().clone())
            .with_cancel(session.cancel_token().clone());
        let started = ctx.started;

        let config = self.config.clone();
        let scan = tokio::spawn(async move { scan_in_batches(&ctx, &ports, &config).await });
        let results = match scan.await {
            Ok(results) => results,
            Err(e) => {
                error!(session = %id, "scan task failed: {e}");
                Vec::new()
            }
        };

        let completed = results.len();
        let open = results.iter().filter(|r| r.open).count();
        info!(session = %id, completed, open, total, elapsed = ?started.elapsed(), "scan finished");
        session.finish(results).await;

        let speed = ports_per_second(completed, Instant::now() - started);
        if !session
            .progress()
            .offer(ProgressEvent::complete(completed, total, open, speed))
        {
            debug!(session = %id, "complete event dropped");
        }

        let grace = self.config.grace.pick(total);
        self.store.schedule_removal(id, grace);
    }
}
