use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::ScanConfig,
    export,
    resolver::{Lookup, Resolver, SystemLookup},
    scanner::{self, SharedProgress},
    error::ScanError,
    types::{ScanCompletion, ScanProgress, ScanRequest, ScanResult, WordlistSource},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
    resolver: Arc<Resolver<Arc<dyn Lookup>>>,
}

#[derive(Debug, Default)]
struct ServerState {
    state: ScanState,
    results: Option<ScanResult>,
    progress: Option<SharedProgress>,
    cancel: Option<CancellationToken>,
    error: Option<String>,
    // outcomes sent to the diagnostic channel by the last finished scan
    diagnostics: u64,
    // bumped per scan so a replaced scan cannot overwrite its successor
    generation: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub state: ScanState,
    pub total: u64,
    pub completed: u64,
    pub found: u64,
    pub percent: u8,
    pub diagnostics: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    fn new(state: ScanState, progress: ScanProgress, percent: u8, diagnostics: u64) -> Self {
        Self {
            state,
            total: progress.total,
            completed: progress.completed,
            found: progress.found,
            percent,
            diagnostics,
            error: None,
        }
    }
}

impl ServerState {
    /// Record how the scan task ended. A task that died without returning is `Failed`.
    fn settle(&mut self, outcome: Result<Result<ScanCompletion, ScanError>, JoinError>) {
        if let Some(p) = self.progress.take() {
            self.diagnostics = p.snapshot().diagnostics;
        }
        self.cancel = None;
        match outcome {
            Ok(Ok(ScanCompletion::Completed(results))) => {
                info!(found = results.progress.found, "scan done");
                self.state = ScanState::Done;
                self.results = Some(results);
            }
            Ok(Ok(ScanCompletion::Cancelled(results))) => {
                info!(completed = results.progress.completed, "scan cancelled");
                self.state = ScanState::Cancelled;
                self.results = Some(results);
            }
            Ok(Err(e)) => {
                warn!("scan error: {e}");
                self.state = ScanState::Failed;
                self.error = Some(e.to_string());
            }
            Err(e) => {
                warn!("scan task failed: {e}");
                self.state = ScanState::Failed;
                self.error = Some(format!("scan task failed: {e}"));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartScan {
    pub domain: String,
    #[serde(default)]
    pub words: Option<Vec<String>>,
    #[serde(default)]
    pub wordlist_path: Option<PathBuf>,
    #[serde(flatten)]
    pub config: ScanConfig,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_lookup(Arc::new(SystemLookup))
    }

    /// State backed by a custom lookup instead of the platform resolver.
    pub fn with_lookup(lookup: Arc<dyn Lookup>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            resolver: Arc::new(Resolver::new(lookup)),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .route("/found", get(get_found))
        .route("/export", get(get_export))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::new());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving UI on http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let mut status = match (s.progress.as_ref(), s.results.as_ref()) {
        (Some(p), _) => {
            let live = p.snapshot();
            Status::new(s.state, live.progress, live.percent, live.diagnostics)
        }
        (None, Some(r)) => Status::new(s.state, r.progress, r.progress.percent(), s.diagnostics),
        (None, None) => Status::new(s.state, ScanProgress::default(), 0, s.diagnostics),
    };
    status.error = s.error.clone();
    (StatusCode::OK, Json(status))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn get_found(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let lines = match (s.progress.as_ref(), s.results.as_ref()) {
        (Some(p), _) => p.snapshot().found,
        (None, Some(r)) => r.found_lines(),
        (None, None) => Vec::new(),
    };
    Json(lines)
}

async fn get_export(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.results.as_ref() {
        Some(res) if !res.found.is_empty() => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            export::found_text(res),
        )
            .into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match (s.state, s.cancel.as_ref()) {
        (ScanState::Running, Some(c)) => {
            c.cancel();
            info!("scan cancel requested");
            StatusCode::ACCEPTED
        }
        _ => StatusCode::CONFLICT,
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<StartScan>) -> impl IntoResponse {
    let source = match (req.wordlist_path, req.words) {
        (Some(path), None) => WordlistSource::Path(path),
        (None, Some(words)) => WordlistSource::Inline(words),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                "provide exactly one of `words` or `wordlist_path`".to_string(),
            )
                .into_response()
        }
    };
    let request = match ScanRequest::new(req.domain, source, &req.config) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    // Prepare shared progress and cancel token
    let progress = SharedProgress::new();
    let cancel = CancellationToken::new();

    let generation = {
        let mut s = app.inner.write().await;
        // Cancel any existing scan
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.generation += 1;
        s.state = ScanState::Running;
        s.results = None;
        s.error = None;
        s.diagnostics = 0;
        s.progress = Some(progress.clone());
        s.cancel = Some(cancel.clone());
        s.generation
    };
    info!(domain = request.domain(), generation, "scan started");

    let resolver = app.resolver.clone();
    let scan = tokio::spawn(async move {
        scanner::run_scan_with_resolver(resolver, &request, &progress, cancel).await
    });

    let inner = app.inner.clone();
    tokio::spawn(async move {
        // a panicking scan surfaces here as a JoinError
        let outcome = scan.await;
        let mut s = inner.write().await;
        if s.generation == generation {
            s.settle(outcome);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(Status::new(ScanState::Running, ScanProgress::default(), 0, 0)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exploding_scan() -> Result<ScanCompletion, ScanError> {
        panic!("scan blew up")
    }

    #[tokio::test]
    async fn dead_scan_task_settles_as_failed() {
        let mut s = ServerState {
            state: ScanState::Running,
            progress: Some(SharedProgress::new()),
            cancel: Some(CancellationToken::new()),
            ..ServerState::default()
        };
        let panicked = tokio::spawn(exploding_scan()).await;
        assert!(panicked.is_err());

        s.settle(panicked);

        assert_eq!(s.state, ScanState::Failed);
        assert!(s.progress.is_none());
        assert!(s.cancel.is_none());
        let error = s.error.expect("failure is reported");
        assert!(error.starts_with("scan task failed"), "{error}");
    }
}
