//! ghs-upload command-line entry point.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use ghs_transfer::format_rate;
use ghs_upload::{
    FileId, HttpClient, UploadEvent, UploadFile, UploadOrchestrator, UploadStatus,
    scan_files_for_upload,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Upload files and folders to a ghs file server.
#[derive(Debug, Parser)]
#[command(name = "ghs-upload", version, about)]
struct Cli {
    /// Files or directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Server base URL (overrides `server` in the config file).
    #[arg(long, short)]
    server: Option<String>,

    /// Destination directory on the server.
    #[arg(long, short)]
    dest: Option<String>,

    /// Path prefix of the multipart endpoints.
    #[arg(long)]
    prefix: Option<String>,

    /// Configuration file (default: ~/.config/ghs/upload.toml).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Part size in bytes.
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Parts in flight per file.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Use multipart only above this many parts.
    #[arg(long)]
    threshold: Option<usize>,

    /// Files uploaded at the same time.
    #[arg(long)]
    parallel: Option<usize>,

    /// Always send whole files in one request.
    #[arg(long)]
    no_multipart: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server = Some(server.clone());
        }
        if let Some(dest) = &self.dest {
            config.dest = dest.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.upload.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.upload.concurrency = concurrency;
        }
        if let Some(threshold) = self.threshold {
            config.upload.threshold = threshold;
        }
        if let Some(parallel) = self.parallel {
            config.upload.parallel_files = parallel;
        }
        if self.no_multipart {
            config.upload.multipart_enabled = false;
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.upload.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.paths, config))
}

async fn run(paths: Vec<PathBuf>, config: Config) -> anyhow::Result<()> {
    let server = config
        .server
        .as_deref()
        .context("no server configured; pass --server or set `server` in the config file")?;

    let mut client = HttpClient::new(server)?.with_prefix(&config.prefix);
    if config.request_timeout_secs > 0 {
        client = client.with_timeout(Duration::from_secs(config.request_timeout_secs));
    }

    let mut files = Vec::new();
    for path in &paths {
        let (found, total) = scan_files_for_upload(path)
            .with_context(|| format!("scanning {}", path.display()))?;
        tracing::debug!(path = %path.display(), files = found.len(), total_bytes = total, "scanned");
        for local in found {
            files.push(UploadFile::from_path(
                &local.path,
                &config.dest,
                &local.relative_path,
            )?);
        }
    }
    if files.is_empty() {
        bail!("nothing to upload");
    }

    tracing::info!(
        server,
        dest = %config.dest,
        files = files.len(),
        "uploading"
    );

    let mut orch = UploadOrchestrator::new(Arc::new(client), config.upload);
    let events = orch
        .take_events()
        .context("event receiver already taken")?;
    let printer = tokio::spawn(print_events(events));

    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, canceling uploads");
            cancel.cancel();
        }
    });

    let results = orch.upload_all(files).await;
    drop(orch);
    let _ = printer.await;

    let failed = results
        .iter()
        .filter(|r| r.status != UploadStatus::Completed)
        .count();
    for r in results.iter().filter(|r| r.status != UploadStatus::Completed) {
        eprintln!(
            "{}: {:?} {}",
            r.path,
            r.status,
            r.error.as_deref().unwrap_or_default()
        );
    }

    if failed > 0 {
        bail!("{failed} of {} uploads did not complete", results.len());
    }
    println!("{} file(s) uploaded", results.len());
    Ok(())
}

/// Prints one line per lifecycle event and throughput sample.
async fn print_events(mut events: mpsc::Receiver<UploadEvent>) {
    let mut names: HashMap<FileId, (String, u64)> = HashMap::new();
    let mut sent: HashMap<FileId, u64> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Started {
                file_id,
                path,
                total_bytes,
                chunked,
            } => {
                let mode = if chunked { "multipart" } else { "single" };
                println!("{path}: started ({total_bytes} bytes, {mode})");
                names.insert(file_id, (path, total_bytes));
            }
            UploadEvent::Progress {
                file_id,
                sent_bytes,
                ..
            } => {
                sent.insert(file_id, sent_bytes);
            }
            UploadEvent::Rate {
                file_id,
                bytes_per_sec,
                eta,
            } => {
                if let Some((path, total)) = names.get(&file_id) {
                    let done = sent.get(&file_id).copied().unwrap_or_default();
                    let pct = if *total == 0 {
                        100.0
                    } else {
                        done as f64 * 100.0 / *total as f64
                    };
                    println!(
                        "{path}: {pct:5.1}% {} {}",
                        format_rate(bytes_per_sec),
                        format_eta(eta)
                    );
                }
            }
            UploadEvent::Retrying {
                file_id,
                part_number,
                attempt,
                delay,
            } => {
                if let Some((path, _)) = names.get(&file_id) {
                    println!(
                        "{path}: part {part_number} timed out (attempt {attempt}), retrying in {delay:?}"
                    );
                }
            }
            UploadEvent::Completed {
                file_id,
                average_rate,
                ..
            } => {
                if let Some((path, _)) = names.get(&file_id) {
                    println!("{path}: done, avg {}", format_rate(average_rate));
                }
            }
            UploadEvent::Failed { file_id, error } => {
                if let Some((path, _)) = names.get(&file_id) {
                    println!("{path}: failed: {error}");
                }
            }
            UploadEvent::Canceled { file_id } => {
                if let Some((path, _)) = names.get(&file_id) {
                    println!("{path}: canceled");
                }
            }
        }
    }
}

/// Formats a time-left estimate as `eta 1h02m03s`, `eta 4m05s` or `eta 6s`.
fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "eta --".to_string();
    };
    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("eta {h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("eta {m}m{s:02}s")
    } else {
        format!("eta {s}s")
    }
}
