use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::ScanError;

/// Where the candidate labels come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordlistSource {
    /// Read and split by the coordinator before scheduling.
    Path(PathBuf),
    /// Already in memory, used as given (after trimming blank lines).
    Inline(Vec<String>),
}

/// Everything one scan needs. Built once and never mutated.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    domain: String,
    wordlist: WordlistSource,
    concurrency: usize,
    timeout: Duration,
    retry_count: u32,
}

impl ScanRequest {
    pub fn new(
        domain: impl Into<String>,
        wordlist: WordlistSource,
        config: &ScanConfig,
    ) -> Result<Self, ScanError> {
        let domain: String = domain.into();
        let domain = domain.trim().trim_end_matches('.').to_string();
        if domain.is_empty() {
            return Err(ScanError::InvalidRequest("domain must not be empty".into()));
        }
        if config.max_threads == 0 {
            return Err(ScanError::InvalidRequest(
                "max_threads must be at least 1".into(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(ScanError::InvalidRequest(
                "timeout_secs must be at least 1".into(),
            ));
        }
        Ok(Self {
            domain,
            wordlist,
            concurrency: config.max_threads,
            timeout: Duration::from_secs(config.timeout_secs),
            retry_count: config.retry_count,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn wordlist(&self) -> &WordlistSource {
        &self.wordlist
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// `label.domain`, with surrounding whitespace and a trailing root dot stripped.
pub fn candidate_name(label: &str, domain: &str) -> String {
    format!(
        "{}.{}",
        label.trim(),
        domain.trim().trim_end_matches('.')
    )
}

/// Classified result of resolving one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Found { candidate: String, address: IpAddr },
    NotFound { candidate: String },
    Error { candidate: String, cause: String },
}

/// Live counters of a scan. `found <= completed <= total` always holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub total: u64,
    pub completed: u64,
    pub found: u64,
}

impl ScanProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// `floor(100 * completed / total)`; an empty scan counts as done.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed.saturating_mul(100) / self.total).min(100) as u8
    }
}

/// One resolved subdomain as kept in the final result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FoundEntry {
    pub candidate: String,
    pub address: IpAddr,
    pub timestamp: String,
}

impl fmt::Display for FoundEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.candidate, self.address)
    }
}

/// Found entries in completion order plus the final counters.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub found: Vec<FoundEntry>,
    pub progress: ScanProgress,
}

impl ScanResult {
    /// The found entries rendered one per line, as shown while scanning.
    pub fn found_lines(&self) -> Vec<String> {
        self.found.iter().map(ToString::to_string).collect()
    }
}

/// How a scan that got past reading its wordlist ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCompletion {
    Completed(ScanResult),
    Cancelled(ScanResult),
}

impl ScanCompletion {
    pub fn result(&self) -> &ScanResult {
        match self {
            ScanCompletion::Completed(r) | ScanCompletion::Cancelled(r) => r,
        }
    }

    pub fn into_result(self) -> ScanResult {
        match self {
            ScanCompletion::Completed(r) | ScanCompletion::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanCompletion::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_joins_label_and_domain() {
        assert_eq!(candidate_name(" www ", "example.com."), "www.example.com");
    }

    #[test]
    fn percent_floors_and_handles_empty() {
        let p = ScanProgress {
            total: 3,
            completed: 2,
            found: 1,
        };
        assert_eq!(p.percent(), 66);
        assert_eq!(ScanProgress::new(0).percent(), 100);
    }

    #[test]
    fn request_rejects_bad_parameters() {
        let words = WordlistSource::Inline(vec!["www".into()]);
        assert!(ScanRequest::new("  ", words.clone(), &ScanConfig::default()).is_err());

        let zero_threads = ScanConfig {
            max_threads: 0,
            ..ScanConfig::default()
        };
        assert!(ScanRequest::new("example.com", words.clone(), &zero_threads).is_err());

        let req = ScanRequest::new("example.com.", words, &ScanConfig::default()).unwrap();
        assert_eq!(req.domain(), "example.com");
        assert_eq!(req.concurrency(), 10);
        assert_eq!(req.timeout(), Duration::from_secs(3));
        assert_eq!(req.retry_count(), 2);
        assert_eq!(candidate_name("api", req.domain()), "api.example.com");
    }
}
