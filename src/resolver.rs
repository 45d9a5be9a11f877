use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use crate::error::LookupFailure;
use crate::types::ResolutionOutcome;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A forward name-to-address lookup.
///
/// Implementations must be callable from many tasks at once.
#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, LookupFailure>;
}

#[async_trait]
impl<T: Lookup + ?Sized> Lookup for Arc<T> {
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, LookupFailure> {
        (**self).lookup(name).await
    }
}

/// The platform resolver (`getaddrinfo` on a blocking thread, via `tokio::net::lookup_host`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, LookupFailure> {
        let addrs = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|e| classify_io_error(name, e))?;
        Ok(addrs.map(|sa| sa.ip()).collect())
    }
}

/// Map a platform lookup error onto a failure class.
///
/// Every `getaddrinfo` failure (unknown name, no data, temporary failure) is
/// "no such name"; input the platform refuses outright is malformed.
fn classify_io_error(name: &str, err: io::Error) -> LookupFailure {
    if err.kind() == io::ErrorKind::InvalidInput {
        return LookupFailure::Malformed(format!("{name}: {err}"));
    }
    if is_name_resolution_error(&err) {
        return LookupFailure::NoSuchName(err.to_string());
    }
    LookupFailure::Other(err.to_string())
}

#[cfg(not(windows))]
fn is_name_resolution_error(err: &io::Error) -> bool {
    err.to_string()
        .starts_with("failed to lookup address information")
}

#[cfg(windows)]
fn is_name_resolution_error(err: &io::Error) -> bool {
    // WSAHOST_NOT_FOUND, WSATRY_AGAIN, WSANO_DATA
    matches!(err.raw_os_error(), Some(11001 | 11002 | 11004))
}

/// Resolves one candidate at a time and applies the retry policy.
///
/// Holds no mutable state, so one instance can be shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct Resolver<L = SystemLookup> {
    lookup: L,
}

impl Resolver<SystemLookup> {
    pub fn system() -> Self {
        Self::new(SystemLookup)
    }
}

impl<L: Lookup> Resolver<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Resolve `candidate`, bounding each attempt by `timeout`.
    ///
    /// "No such name" failures are retried up to `retry_count` extra times
    /// before giving up with `NotFound`. Any other failure, a timed out
    /// attempt included, returns `Error` straight away.
    pub async fn resolve(
        &self,
        candidate: &str,
        timeout: Duration,
        retry_count: u32,
    ) -> ResolutionOutcome {
        if let Err(failure) = validate_name(candidate) {
            return ResolutionOutcome::Error {
                candidate: candidate.to_string(),
                cause: failure.to_string(),
            };
        }

        let mut retries_left = retry_count;
        loop {
            match self.attempt(candidate, timeout).await {
                Ok(address) => {
                    return ResolutionOutcome::Found {
                        candidate: candidate.to_string(),
                        address,
                    }
                }
                Err(failure) if failure.is_retryable() => {
                    if retries_left == 0 {
                        return ResolutionOutcome::NotFound {
                            candidate: candidate.to_string(),
                        };
                    }
                    retries_left -= 1;
                }
                Err(failure) => {
                    return ResolutionOutcome::Error {
                        candidate: candidate.to_string(),
                        cause: failure.to_string(),
                    }
                }
            }
        }
    }

    async fn attempt(&self, name: &str, timeout: Duration) -> Result<IpAddr, LookupFailure> {
        let addrs = time::timeout(timeout, self.lookup.lookup(name))
            .await
            .map_err(|_| LookupFailure::TimedOut(timeout))??;
        pick_address(&addrs).ok_or_else(|| LookupFailure::NoSuchName(name.to_string()))
    }
}

/// First IPv4 address if there is one, otherwise the first address at all.
fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Reject names no resolver could answer for, before spending a lookup on them.
pub fn validate_name(name: &str) -> Result<(), LookupFailure> {
    let bare = name.strip_suffix('.').unwrap_or(name);
    if bare.is_empty() {
        return Err(LookupFailure::Malformed("empty name".into()));
    }
    if bare.len() > MAX_NAME_LEN {
        return Err(LookupFailure::Malformed(format!(
            "{name}: longer than {MAX_NAME_LEN} octets"
        )));
    }
    if bare.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(LookupFailure::Malformed(format!(
            "{name:?}: contains whitespace or control characters"
        )));
    }
    for label in bare.split('.') {
        if label.is_empty() {
            return Err(LookupFailure::Malformed(format!("{name}: empty label")));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(LookupFailure::Malformed(format!(
                "{name}: label longer than {MAX_LABEL_LEN} octets"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with "no such name" a fixed number of times, then answers.
    struct FlakyLookup {
        failures: u32,
        calls: AtomicU32,
        answer: IpAddr,
    }

    #[async_trait]
    impl Lookup for FlakyLookup {
        async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, LookupFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(LookupFailure::NoSuchName(name.to_string()))
            } else {
                Ok(vec![self.answer])
            }
        }
    }

    struct BrokenLookup {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Lookup for BrokenLookup {
        async fn lookup(&self, _name: &str) -> Result<Vec<IpAddr>, LookupFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LookupFailure::Other("network unreachable".into()))
        }
    }

    struct SlowLookup {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Lookup for SlowLookup {
        async fn lookup(&self, _name: &str) -> Result<Vec<IpAddr>, LookupFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_secs(60)).await;
            Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)])
        }
    }

    fn flaky(failures: u32) -> Resolver<FlakyLookup> {
        Resolver::new(FlakyLookup {
            failures,
            calls: AtomicU32::new(0),
            answer: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        })
    }

    #[tokio::test]
    async fn success_on_last_allowed_attempt_is_found() {
        let r = flaky(2);
        let out = r.resolve("a.example.com", Duration::from_secs(1), 2).await;
        assert_eq!(
            out,
            ResolutionOutcome::Found {
                candidate: "a.example.com".into(),
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }
        );
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_not_found() {
        let r = flaky(3);
        let out = r.resolve("a.example.com", Duration::from_secs(1), 2).await;
        assert!(matches!(out, ResolutionOutcome::NotFound { .. }));
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let r = flaky(1);
        let out = r.resolve("a.example.com", Duration::from_secs(1), 0).await;
        assert!(matches!(out, ResolutionOutcome::NotFound { .. }));
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_failures_do_not_retry() {
        let r = Resolver::new(BrokenLookup {
            calls: AtomicU32::new(0),
        });
        let out = r.resolve("a.example.com", Duration::from_secs(1), 5).await;
        match out {
            ResolutionOutcome::Error { cause, .. } => assert!(cause.contains("unreachable")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_an_error_after_one_attempt() {
        let r = Resolver::new(SlowLookup {
            calls: AtomicU32::new(0),
        });
        let out = r.resolve("slow.example.com", Duration::from_secs(3), 2).await;
        match out {
            ResolutionOutcome::Error { candidate, cause } => {
                assert_eq!(candidate, "slow.example.com");
                assert!(cause.contains("timed out"), "{cause}");
            }
            other => panic!("expected a timeout error, got {other:?}"),
        }
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_names_never_reach_the_lookup() {
        let r = Resolver::new(BrokenLookup {
            calls: AtomicU32::new(0),
        });
        let long_label = format!("{}.example.com", "a".repeat(64));
        for name in ["", ".example.com", "a..example.com", long_label.as_str()] {
            let out = r.resolve(name, Duration::from_secs(1), 2).await;
            assert!(matches!(out, ResolutionOutcome::Error { .. }), "{name}");
        }
        assert_eq!(r.lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prefers_ipv4() {
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let v4 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));
        assert_eq!(pick_address(&[v6, v4]), Some(v4));
        assert_eq!(pick_address(&[v6]), Some(v6));
        assert_eq!(pick_address(&[]), None);
    }

    #[test]
    fn nul_byte_is_malformed() {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "nul byte");
        assert!(matches!(
            classify_io_error("a\0b", err),
            LookupFailure::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn system_lookup_reports_unknown_names_as_no_such_name() {
        // `.invalid` is reserved and never resolves.
        match SystemLookup.lookup("nonexistent.invalid").await {
            Err(LookupFailure::NoSuchName(_)) => {}
            other => panic!("expected NoSuchName, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_lookup_resolves_localhost() {
        let out = Resolver::system()
            .resolve("localhost", Duration::from_secs(3), 0)
            .await;
        match out {
            ResolutionOutcome::Found { address, .. } => assert!(address.is_loopback()),
            other => panic!("expected localhost to resolve, got {other:?}"),
        }
    }
}
