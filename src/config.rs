use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_THREADS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_RETRY_COUNT: u32 = 2;

/// Tunables shared by the CLI and the HTTP API. Missing fields take the defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// Max resolutions in flight at once.
    pub max_threads: usize,
    /// Per-attempt lookup timeout.
    pub timeout_secs: u64,
    /// Extra attempts after a "no such name" failure.
    pub retry_count: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"max_threads": 50}"#).unwrap();
        assert_eq!(cfg.max_threads, 50);
        assert_eq!(cfg.timeout_secs, 3);
        assert_eq!(cfg.retry_count, 2);
    }
}
