use serde::{Deserialize, Serialize};

/// A port number as parsed from a port spec. Wider than `u16` because the parser
/// does not range-check; the probe rejects values a socket cannot carry.
pub type Port = u32;

/// Outcome of probing one host:port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub host: String,
    pub port: Port,
    pub open: bool,
    pub service: String,
    /// Dial failure description; only set when `open` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Complete,
}

/// Sampled snapshot of scan advancement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub completed: usize,
    pub total: usize,
    pub percent: u32,
    pub open_ports: usize,
    pub ports_per_second: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_label: Option<String>,
}

impl ProgressEvent {
    pub fn progress(
        completed: usize,
        total: usize,
        open_ports: usize,
        ports_per_second: u64,
    ) -> Self {
        Self {
            kind: EventKind::Progress,
            completed,
            total,
            percent: percent(completed, total),
            open_ports,
            ports_per_second,
            batch_label: None,
        }
    }

    pub fn complete(
        completed: usize,
        total: usize,
        open_ports: usize,
        ports_per_second: u64,
    ) -> Self {
        Self {
            kind: EventKind::Complete,
            ..Self::progress(completed, total, open_ports, ports_per_second)
        }
    }

    pub fn with_batch_label(mut self, label: impl Into<String>) -> Self {
        self.batch_label = Some(label.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.kind == EventKind::Complete
    }
}

/// `completed * 100 / total`, truncated and clamped to 100. An empty scan is 100%.
pub fn percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((completed.saturating_mul(100) / total).min(100)) as u32
}

/// Whole ports per second since a scan started.
pub fn ports_per_second(completed: usize, elapsed: std::time::Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (completed as f64 / secs) as u64
    } else {
        0
    }
}
