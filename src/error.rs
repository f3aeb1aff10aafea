use thiserror::Error;

/// Why a textual port specification was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortSpecError {
    #[error("invalid port range: {0}")]
    InvalidRange(String),

    #[error("invalid range start: {0}")]
    InvalidStart(String),

    #[error("invalid range end: {0}")]
    InvalidEnd(String),

    #[error("range start is greater than end: {0}")]
    StartAfterEnd(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("port spec expands to more than {0} ports")]
    TooManyPorts(usize),
}

/// Errors surfaced to callers of the scan service.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    PortSpec(#[from] PortSpecError),

    #[error("target must not be empty")]
    EmptyTarget,

    #[error("failed to resolve target {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("no ports to scan")]
    NoPorts,

    #[error("missing sessionId parameter")]
    MissingSessionId,

    #[error("session not found or expired: {0}")]
    SessionNotFound(String),
}

impl ScanError {
    /// Input errors are reported before any session exists.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ScanError::SessionNotFound(_))
    }
}
