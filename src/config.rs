use std::time::Duration;

/// A value picked by request size: `small` up to `small_max` ports, `medium` up to
/// `medium_max`, `large` beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiered<T> {
    pub small_max: usize,
    pub medium_max: usize,
    pub small: T,
    pub medium: T,
    pub large: T,
}

impl<T: Copy> Tiered<T> {
    pub fn pick(&self, port_count: usize) -> T {
        if port_count <= self.small_max {
            self.small
        } else if port_count <= self.medium_max {
            self.medium
        } else {
            self.large
        }
    }
}

/// What a full progress queue does with a new event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DropPolicy {
    /// Discard the incoming event.
    #[default]
    DropNewest,
    /// Evict the oldest queued event to make room.
    DropOldest,
}

/// Sampling strides for engine progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStride {
    /// Completions below this count use `warmup`.
    pub warmup_len: usize,
    pub warmup: usize,
    pub regular: usize,
    /// Stride once the scan total exceeds `busy_total`.
    pub busy: usize,
    pub busy_total: usize,
}

impl ProgressStride {
    /// Whether an event should be offered after `completed` of `total` units.
    pub fn should_emit(&self, completed: usize, total: usize) -> bool {
        if completed == total {
            return true;
        }
        let stride = if completed < self.warmup_len {
            self.warmup
        } else if total > self.busy_total {
            self.busy
        } else {
            self.regular
        };
        stride > 0 && completed % stride == 0
    }
}

/// Tunables for the scan engine, batch coordinator and session store.
///
/// `Default` reproduces the stock behaviour; every field can be overridden.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Worker pool size per engine run.
    pub concurrency: Tiered<usize>,
    /// Per-probe dial timeout.
    pub dial_timeout: Tiered<Duration>,
    /// How long a finished session stays queryable.
    pub grace: Tiered<Duration>,
    /// Requests larger than this are split into chunks of this size.
    pub batch_size: usize,
    /// Pause between consecutive chunks.
    pub batch_pause: Duration,
    /// Wall-clock bound on one engine run; in-flight probes are cancelled when it fires.
    pub scan_deadline: Duration,
    /// Capacity of each session's progress queue.
    pub progress_capacity: usize,
    pub drop_policy: DropPolicy,
    pub progress_stride: ProgressStride,
    /// A progress stream ends after this long without an event.
    pub stream_idle_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: Tiered {
                small_max: 1_000,
                medium_max: 10_000,
                small: 1_000,
                medium: 500,
                large: 200,
            },
            dial_timeout: Tiered {
                small_max: 10_000,
                medium_max: 50_000,
                small: Duration::from_secs(2),
                medium: Duration::from_secs(3),
                large: Duration::from_secs(5),
            },
            grace: Tiered {
                small_max: 1_000,
                medium_max: 10_000,
                small: Duration::from_secs(30),
                medium: Duration::from_secs(60),
                large: Duration::from_secs(120),
            },
            batch_size: 1_000,
            batch_pause: Duration::from_millis(100),
            scan_deadline: Duration::from_secs(30 * 60),
            progress_capacity: 100,
            drop_policy: DropPolicy::DropNewest,
            progress_stride: ProgressStride {
                warmup_len: 1_000,
                warmup: 10,
                regular: 50,
                busy: 100,
                busy_total: 5_000,
            },
            stream_idle_timeout: Duration::from_secs(300),
        }
    }
}
