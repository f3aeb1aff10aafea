use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ScanConfig;
use crate::ports::service_name;
use crate::session::ProgressChannel;
use crate::types::{ports_per_second, Port, ProgressEvent, ScanResult};

/// How a single port is probed. Defaults to [`probe`].
pub type ProbeFn =
    Arc<dyn Fn(IpAddr, Port, Duration) -> BoxFuture<'static, ScanResult> + Send + Sync>;

fn tcp_probe() -> ProbeFn {
    Arc::new(|host, port, timeout| probe(host, port, timeout).boxed())
}

/// Everything one scan needs besides the ports themselves.
#[derive(Clone)]
pub struct ScanContext {
    pub host: IpAddr,
    /// Per-probe dial timeout.
    pub timeout: Duration,
    /// Where sampled progress goes; `None` scans silently.
    pub progress: Option<ProgressChannel>,
    /// Stops dispatch and aborts in-flight dials.
    pub cancel: CancellationToken,
    pub started: Instant,
    prober: ProbeFn,
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("host", &self.host)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress)
            .field("cancel", &self.cancel)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl ScanContext {
    pub fn new(host: IpAddr, timeout: Duration) -> Self {
        Self {
            host,
            timeout,
            progress: None,
            cancel: CancellationToken::new(),
            started: Instant::now(),
            prober: tcp_probe(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the TCP connect probe, e.g. with a scripted one.
    pub fn with_prober(mut self, prober: ProbeFn) -> Self {
        self.prober = prober;
        self
    }

    pub(crate) fn offer(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.offer(event);
        }
    }
}

/// Attempt one TCP connect to `host:port`, bounded by `timeout`.
///
/// The connection is closed as soon as it is established. Closed, filtered and
/// unreachable ports come back as `open: false` with the dial error attached.
pub async fn probe(host: IpAddr, port: Port, timeout: Duration) -> ScanResult {
    let service = service_name(port).to_string();
    let closed = |error: String| ScanResult {
        host: host.to_string(),
        port,
        open: false,
        service: service.clone(),
        error: Some(error),
    };

    let Ok(socket_port) = u16::try_from(port) else {
        return closed(format!("invalid port {port}"));
    };
    let addr = SocketAddr::new(host, socket_port);

    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ScanResult {
                host: host.to_string(),
                port,
                open: true,
                service: service.clone(),
                error: None,
            }
        }
        Ok(Err(e)) => closed(format!("dial tcp {addr}: {e}")),
        Err(_) => closed(format!("dial tcp {addr}: i/o timeout")),
    }
}

#[derive(Default)]
struct Tally {
    completed: usize,
    open: usize,
    results: Vec<ScanResult>,
}

/// Probe every port in `ports` with a fixed pool of workers.
///
/// The pool size is the configured concurrency tier for `ports.len()`. Results are
/// in completion order. Progress is sampled per [`crate::config::ProgressStride`] and
/// offered without blocking. A unit that panics is logged and still counts as
/// completed. When the configured deadline passes, in-flight probes are cancelled
/// and the results gathered so far are returned.
pub async fn scan_ports(
    ctx: &ScanContext,
    ports: &[Port],
    config: &ScanConfig,
) -> Vec<ScanResult> {
    let total = ports.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = config.concurrency.pick(total).clamp(1, total);
    let cancel = ctx.cancel.child_token();
    let run_started = Instant::now();
    let tally = Arc::new(Mutex::new(Tally {
        results: Vec::with_capacity(total),
        ..Tally::default()
    }));

    let (tx, rx) = mpsc::channel::<Port>(workers);
    let rx = Arc::new(Mutex::new(rx));
    let mut set = JoinSet::new();

    let feed: Vec<Port> = ports.to_vec();
    let feed_cancel = cancel.clone();
    set.spawn(async move {
        for port in feed {
            tokio::select! {
                biased;
                _ = feed_cancel.cancelled() => break,
                sent = tx.send(port) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    for _ in 0..workers {
        let rx = rx.clone();
        let tally = tally.clone();
        let cancel = cancel.clone();
        let progress = ctx.progress.clone();
        let stride = config.progress_stride;
        let prober = ctx.prober.clone();
        let (host, timeout) = (ctx.host, ctx.timeout);

        set.spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some(port) = next else { break };

                let unit = async {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = prober(host, port, timeout) => Some(result),
                    }
                };
                let outcome = AssertUnwindSafe(unit).catch_unwind().await;

                let result = match outcome {
                    Ok(Some(result)) => Some(result),
                    Ok(None) => break,
                    Err(panic) => {
                        error!(port, panic = %panic_message(&*panic), "probe task failed");
                        None
                    }
                };

                let mut t = tally.lock().await;
                t.completed += 1;
                if let Some(result) = result {
                    if result.open {
                        t.open += 1;
                    }
                    t.results.push(result);
                }
                if let Some(progress) = &progress {
                    if stride.should_emit(t.completed, total) {
                        progress.offer(ProgressEvent::progress(
                            t.completed,
                            total,
                            t.open,
                            ports_per_second(t.completed, run_started.elapsed()),
                        ));
                    }
                }
            }
        });
    }
    drop(rx);

    let join_all = async {
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("scan worker failed: {e}");
            }
        }
    };
    let mut join_all = Box::pin(join_all);

    if time::timeout(config.scan_deadline, &mut join_all).await.is_err() {
        let done = tally.lock().await.completed;
        warn!(host = %ctx.host, done, total, "scan deadline reached, cancelling in-flight probes");
        cancel.cancel();
        join_all.await;
    }

    let mut t = tally.lock().await;
    debug!(host = %ctx.host, completed = t.completed, open = t.open, total, "engine run finished");
    std::mem::take(&mut t.results)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
