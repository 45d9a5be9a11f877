use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ScanError;
use crate::resolver::{Lookup, Resolver, SystemLookup};
use crate::types::{
    candidate_name, FoundEntry, ResolutionOutcome, ScanCompletion, ScanProgress, ScanRequest,
    ScanResult, WordlistSource,
};
use crate::wordlist::{clean_labels, load_wordlist_from_path};

/// Receives scan events. All calls come from the coordinator loop, one at a time.
pub trait ScanObserver: Send + Sync {
    /// Called after every completed candidate with `floor(100 * completed / total)`.
    fn on_progress(&self, _percent: u8, _progress: &ScanProgress) {}
    /// A resolved candidate, formatted as `name (address)`.
    fn on_found(&self, _line: &str) {}
    /// A per-candidate failure that is not "no such name".
    fn on_diagnostic(&self, _cause: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Resolve every `label.domain` of the request through the platform resolver.
///
/// - Reads the whole wordlist before scheduling anything.
/// - Admits at most `request.concurrency()` resolutions at once using a `Semaphore`.
/// - Folds outcomes in completion order and reports them to `observer`.
/// - When `cancel` fires, admits nothing new and returns once in-flight lookups drain.
pub async fn run_scan<O>(
    request: &ScanRequest,
    observer: &O,
    cancel: CancellationToken,
) -> Result<ScanCompletion, ScanError>
where
    O: ScanObserver + ?Sized,
{
    let resolver = Arc::new(Resolver::<SystemLookup>::system());
    run_scan_with_resolver(resolver, request, observer, cancel).await
}

/// Same as [`run_scan`] with a caller-supplied resolver.
pub async fn run_scan_with_resolver<L, O>(
    resolver: Arc<Resolver<L>>,
    request: &ScanRequest,
    observer: &O,
    cancel: CancellationToken,
) -> Result<ScanCompletion, ScanError>
where
    L: Lookup + 'static,
    O: ScanObserver + ?Sized,
{
    debug!(domain = request.domain(), "reading wordlist");
    let words: Arc<[String]> = match request.wordlist() {
        WordlistSource::Path(path) => load_wordlist_from_path(path).inspect_err(|e| {
            debug!(error = %e, "wordlist unreadable, scan not started");
        })?,
        WordlistSource::Inline(words) => clean_labels(words.iter().map(String::as_str)),
    }
    .into();

    let total = words.len() as u64;
    let mut tally = Tally::new(total);
    if total == 0 {
        debug!("empty wordlist, nothing to scan");
        return Ok(ScanCompletion::Completed(tally.finish()));
    }

    debug!(
        total,
        concurrency = request.concurrency(),
        retries = request.retry_count(),
        "scanning"
    );

    let domain: Arc<str> = request.domain().into();
    let timeout = request.timeout();
    let retry_count = request.retry_count();
    let sem = Arc::new(Semaphore::new(
        request.concurrency().clamp(1, Semaphore::MAX_PERMITS),
    ));
    let mut set: JoinSet<ResolutionOutcome> = JoinSet::new();
    let mut next = 0usize;
    let mut stopped = false;

    loop {
        let admitting = !stopped && next < words.len();
        if !admitting && set.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled(), if !stopped => {
                debug!(in_flight = set.len(), "cancel requested, draining");
                stopped = true;
            }
            Some(joined) = set.join_next(), if !set.is_empty() => {
                tally.record(joined, observer);
            }
            permit = sem.clone().acquire_owned(), if admitting => {
                let Ok(permit) = permit else {
                    stopped = true;
                    continue;
                };
                let resolver = resolver.clone();
                let words = words.clone();
                let domain = domain.clone();
                let idx = next;
                next += 1;

                set.spawn(async move {
                    let _permit = permit; // keep permit until the lookup is done
                    let candidate = candidate_name(&words[idx], &domain);
                    resolver.resolve(&candidate, timeout, retry_count).await
                });
            }
            else => break,
        }
    }

    let result = tally.finish();
    if stopped && result.progress.completed < total {
        debug!(
            completed = result.progress.completed,
            total, "scan cancelled"
        );
        Ok(ScanCompletion::Cancelled(result))
    } else {
        debug!(found = result.progress.found, total, "scan completed");
        Ok(ScanCompletion::Completed(result))
    }
}

/// Counters plus found entries, only ever touched by the coordinator loop.
struct Tally {
    progress: ScanProgress,
    found: Vec<FoundEntry>,
}

impl Tally {
    fn new(total: u64) -> Self {
        Self {
            progress: ScanProgress::new(total),
            found: Vec::new(),
        }
    }

    fn record<O>(&mut self, joined: Result<ResolutionOutcome, JoinError>, observer: &O)
    where
        O: ScanObserver + ?Sized,
    {
        self.progress.completed += 1;
        match joined {
            Ok(ResolutionOutcome::Found { candidate, address }) => {
                self.progress.found += 1;
                let entry = FoundEntry {
                    candidate,
                    address,
                    timestamp: now_rfc3339(),
                };
                observer.on_found(&entry.to_string());
                self.found.push(entry);
            }
            Ok(ResolutionOutcome::NotFound { .. }) => {}
            Ok(ResolutionOutcome::Error { candidate, cause }) => {
                observer.on_diagnostic(&format!("{candidate}: {cause}"));
            }
            Err(e) => {
                observer.on_diagnostic(&format!("resolution task failed: {e}"));
            }
        }
        observer.on_progress(self.progress.percent(), &self.progress);
    }

    fn finish(self) -> ScanResult {
        ScanResult {
            found: self.found,
            progress: self.progress,
        }
    }
}

/// Snapshot of a running scan as exposed to pollers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveScan {
    pub progress: ScanProgress,
    pub percent: u8,
    pub found: Vec<String>,
    pub diagnostics: u64,
}

/// Observer that publishes every event into a `watch` channel so other tasks can poll it.
///
/// Found lines and diagnostics are held back until the matching progress
/// event, so a snapshot never lists more found lines than `progress.found`.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    tx: Arc<watch::Sender<LiveScan>>,
    pending: Arc<Mutex<Pending>>,
}

#[derive(Debug, Default)]
struct Pending {
    found: Vec<String>,
    diagnostics: u64,
}

impl SharedProgress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LiveScan::default());
        Self {
            tx: Arc::new(tx),
            pending: Arc::default(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LiveScan {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveScan> {
        self.tx.subscribe()
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanObserver for SharedProgress {
    fn on_progress(&self, percent: u8, progress: &ScanProgress) {
        let mut pending = self.pending();
        self.tx.send_modify(|live| {
            live.progress = *progress;
            live.percent = percent;
            live.found.append(&mut pending.found);
            live.diagnostics += std::mem::take(&mut pending.diagnostics);
        });
    }

    fn on_found(&self, line: &str) {
        self.pending().found.push(line.to_string());
    }

    fn on_diagnostic(&self, _cause: &str) {
        self.pending().diagnostics += 1;
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
