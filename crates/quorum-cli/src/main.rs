//! Headless host for the Quorum client core.
//!
//! Drives the upload queue and the processing dashboard from the command
//! line. The browser client consumes the same core through its own host;
//! this binary exists for scripting and smoke-testing against a backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use quorum_core::{
    Config, FileInput, HttpApi, JobKind, PollTier, Snapshot, StatusReconciler, TransferStatus,
    UploadListener, UploadQueue, UploadReceipt,
};

#[derive(Parser, Debug)]
#[command(name = "quorum")]
#[command(about = "Headless client for the Quorum knowledge base")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files and report per-file results
    Upload {
        /// Files to queue; disallowed types are skipped
        files: Vec<PathBuf>,
        /// Keep polling until every job is terminal
        #[arg(long)]
        watch: bool,
    },
    /// Show the processing dashboard
    Status {
        /// Keep polling until every job is terminal
        #[arg(long)]
        watch: bool,
    },
    /// Ask the server to re-run a failed job
    Retry {
        /// Job family: document or minutes
        kind: String,
        /// Job id from the dashboard
        id: String,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quorum=info".parse().expect("valid directive")),
        )
        .init();

    let args = Args::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    if let Err(e) = rt.block_on(run(args)) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load_or_default();
    let api = Arc::new(HttpApi::new(&config));
    let reconciler = StatusReconciler::new(api.clone(), &config);

    match args.command {
        Command::Upload { files, watch } => upload(files, watch, &config, api, reconciler).await,
        Command::Status { watch } => status(watch, reconciler).await,
        Command::Retry { kind, id } => retry(&kind, &id, reconciler).await,
    }
}

/// Re-arms fast polling whenever an accepted upload is still processing
/// server-side.
struct ReconcilerListener {
    reconciler: StatusReconciler,
}

impl UploadListener for ReconcilerListener {
    fn uploaded(&self, _item_id: Uuid, receipt: &UploadReceipt) {
        if !receipt.processing_status.is_terminal() {
            let reconciler = self.reconciler.clone();
            tokio::spawn(async move {
                reconciler.ensure_polling(PollTier::Fast).await;
            });
        }
    }
}

async fn upload(
    paths: Vec<PathBuf>,
    watch: bool,
    config: &Config,
    api: Arc<HttpApi>,
    reconciler: StatusReconciler,
) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("No files given");
    }

    let mut inputs = Vec::with_capacity(paths.len());
    for path in &paths {
        inputs.push(FileInput::from_path(path).await?);
    }

    let listener = Arc::new(ReconcilerListener {
        reconciler: reconciler.clone(),
    });
    let queue = UploadQueue::new(api, listener, config);

    let accepted = queue.add_files(inputs).await;
    if accepted < paths.len() {
        tracing::warn!(
            skipped = paths.len() - accepted,
            "Skipped files with unsupported extensions"
        );
    }
    if accepted == 0 {
        return Ok(());
    }

    tracing::info!(count = accepted, "Starting upload");
    queue.start_upload().await?;

    for item in queue.items().await {
        match item.transfer_status {
            TransferStatus::Completed => {
                let doc = item
                    .server_result
                    .as_ref()
                    .map(|r| r.document_id.as_str())
                    .unwrap_or("-");
                println!("uploaded  {}  ({})", item.file_name, doc);
            }
            TransferStatus::Failed => {
                let reason = item.error.map(|e| e.to_string()).unwrap_or_default();
                println!("failed    {}  {}", item.file_name, reason);
            }
            _ => {}
        }
    }

    if watch {
        watch_until_idle(&reconciler).await?;
    }
    Ok(())
}

async fn status(watch: bool, reconciler: StatusReconciler) -> Result<()> {
    if watch {
        watch_until_idle(&reconciler).await
    } else {
        let snapshot = reconciler.refresh().await?;
        print_snapshot(&snapshot);
        Ok(())
    }
}

async fn retry(kind: &str, id: &str, reconciler: StatusReconciler) -> Result<()> {
    let kind = match kind {
        "document" => JobKind::Document,
        "minutes" | "meeting-minutes" => JobKind::MeetingMinutes,
        other => anyhow::bail!("Unknown job kind: {other}"),
    };
    reconciler.retry(kind, id).await?;
    tracing::info!(id, "Retry requested");
    Ok(())
}

/// Print each published snapshot until nothing is active or the user
/// interrupts.
async fn watch_until_idle(reconciler: &StatusReconciler) -> Result<()> {
    let mut rx = reconciler.subscribe();
    reconciler.ensure_polling(PollTier::Fast).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    print_snapshot(&snapshot);
                    if !snapshot.has_active() {
                        break;
                    }
                }
            }
        }
    }

    reconciler.stop().await;
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    let stats = &snapshot.stats;
    println!(
        "pending: {}  processing: {}  completed today: {}  failed today: {}",
        stats.pending, stats.processing, stats.completed_today, stats.failed_today
    );
    if snapshot.items.is_empty() {
        println!("  (no active jobs)");
        return;
    }
    for item in &snapshot.items {
        println!(
            "  [{}] {}  {}  {}",
            item.status.as_str(),
            kind_label(item.kind),
            item.title,
            item.error.as_deref().unwrap_or("")
        );
    }
}

fn kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Document => "document",
        JobKind::MeetingMinutes => "minutes",
    }
}
