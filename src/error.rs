use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Scan-level failures. Anything per-candidate is folded into a
/// [`ResolutionOutcome`](crate::types::ResolutionOutcome) instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to read wordlist {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),
}

/// Why a single lookup attempt did not produce an address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    #[error("no such name: {0}")]
    NoSuchName(String),
    #[error("lookup timed out after {0:?}")]
    TimedOut(Duration),
    #[error("malformed name: {0}")]
    Malformed(String),
    #[error("{0}")]
    Other(String),
}

impl LookupFailure {
    /// Only "no such name" class failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupFailure::NoSuchName(_))
    }
}
