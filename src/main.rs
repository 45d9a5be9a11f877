use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use subscan_rs::config::{ScanConfig, DEFAULT_MAX_THREADS, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_SECS};
use subscan_rs::scanner::{self, ScanObserver};
use subscan_rs::types::{ScanProgress, ScanRequest, ScanResult, WordlistSource};
use subscan_rs::{export, logging, server};

/// subscan-rs: fast async subdomain discovery over the system resolver, with a tiny embedded web UI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "subscan-rs",
    version,
    about = "Fast async subdomain discovery over the system resolver, with a tiny embedded web UI.",
    long_about = None
)]
struct Cli {
    /// Target domain, e.g. example.com. Required unless only serving the UI.
    #[arg(long)]
    domain: Option<String>,

    /// Path to the wordlist file (one label per line).
    #[arg(long)]
    wordlist: Option<PathBuf>,

    /// Max concurrent lookups.
    #[arg(long, default_value_t = DEFAULT_MAX_THREADS)]
    threads: usize,

    /// Per-attempt lookup timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Extra attempts after a "no such name" answer.
    #[arg(long, default_value_t = DEFAULT_RETRY_COUNT)]
    retries: u32,

    /// Write the found lines as plain text to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    json: Option<PathBuf>,

    /// Start the embedded HTTP UI server.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address the UI server listens on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Also append log lines to this file.
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            max_threads: self.threads,
            timeout_secs: self.timeout,
            retry_count: self.retries,
        }
    }
}

/// Draws a progress bar and prints found lines above it.
struct TerminalObserver {
    bar: ProgressBar,
}

impl TerminalObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ScanObserver for TerminalObserver {
    fn on_progress(&self, percent: u8, progress: &ScanProgress) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(format!(
            "{}/{} checked, {} found",
            progress.completed, progress.total, progress.found
        ));
    }

    fn on_found(&self, line: &str) {
        self.bar.println(format!("[+] {line}"));
    }

    fn on_diagnostic(&self, cause: &str) {
        self.bar.suspend(|| warn!("{cause}"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref())?;

    // Start embedded UI server if requested (non-blocking background task)
    if cli.serve_ui {
        let bind = cli.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind).await {
                error!("HTTP UI server error: {e:#}");
            }
        });
        println!("UI server starting at http://{} (Ctrl+C to stop)", cli.bind);
    }

    match (cli.domain.as_deref(), cli.wordlist.as_ref()) {
        (Some(domain), Some(wordlist)) => run_cli_scan(&cli, domain, wordlist.clone()).await?,
        (None, None) if cli.serve_ui => {}
        _ => bail!("both --domain and --wordlist are required to run a scan"),
    }

    // If UI is running, keep the process alive until Ctrl+C.
    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

async fn run_cli_scan(cli: &Cli, domain: &str, wordlist: PathBuf) -> Result<()> {
    let request = ScanRequest::new(domain, WordlistSource::Path(wordlist), &cli.scan_config())?;

    println!("subscan-rs configuration:");
    println!("  domain       : {}", request.domain());
    if let WordlistSource::Path(p) = request.wordlist() {
        println!("  wordlist     : {}", p.display());
    }
    println!("  threads      : {}", request.concurrency());
    println!("  timeout      : {}s", request.timeout().as_secs());
    println!("  retries      : {}", request.retry_count());

    // Ctrl-C stops admitting new lookups; in-flight ones still finish.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let observer = TerminalObserver::new();
    let completion = scanner::run_scan(&request, &observer, cancel)
        .await
        .context("scan aborted")?;
    observer.bar.finish_and_clear();

    let cancelled = completion.is_cancelled();
    let results = completion.into_result();
    print_summary(&results, cancelled);
    info!(
        found = results.progress.found,
        completed = results.progress.completed,
        total = results.progress.total,
        cancelled,
        "scan finished"
    );

    if let Some(path) = cli.output.as_deref() {
        match export::write_found_lines(path, &results) {
            Ok(()) => println!("Wrote found subdomains to {}", path.display()),
            Err(e) => eprintln!("Export skipped: {e:#}"),
        }
    }
    if let Some(path) = cli.json.as_deref() {
        if let Err(e) = export::write_results_json(path, &results) {
            eprintln!("Failed to write JSON to {}: {:#}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }
    Ok(())
}

fn print_summary(results: &ScanResult, cancelled: bool) {
    let mut name_w = "subdomain".len();
    for e in &results.found {
        name_w = name_w.max(e.candidate.len());
    }

    println!();
    println!("{:<name_w$}  {:<39}  {}", "subdomain", "address", "found_at");
    println!("{:-<name_w$}  {:-<39}  {:-<20}", "", "", "");
    for e in &results.found {
        println!(
            "{:<name_w$}  {:<39}  {}",
            e.candidate,
            e.address.to_string(),
            e.timestamp
        );
    }

    let state = if cancelled { "Scan cancelled" } else { "Scan complete" };
    println!(
        "\n{state}: {} subdomains found ({}/{} checked).",
        results.progress.found, results.progress.completed, results.progress.total
    );
}
