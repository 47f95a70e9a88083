//! # narration-sync - Command Line Entry Point
//!
//! Runs the synchronization pipeline for one or more books stored under the
//! configured data directory and exits when every book has finished, failed
//! or been stopped.
//!
//! ## What happens on start:
//! 1. **Environment**: `.env` is loaded, logging initialised
//! 2. **Configuration**: defaults, `config.toml`, `SYNC_*` variables, then
//!    any `--settings` JSON from the command line
//! 3. **Worker**: task store, audio tools and transcription engine are wired
//!    into an orchestrator, and every requested book is queued
//! 4. **Shutdown**: Ctrl+C cancels every book; the run stops at the next
//!    safe point and can be resumed later

use anyhow::Result;
use clap::Parser;
use narration_sync::audio::FfmpegAudio;
use narration_sync::config::AppConfig;
use narration_sync::pipeline::{EventBus, EventKind, JsonTaskStore, Orchestrator, PipelineContext};
use narration_sync::transcription::{SidecarTranscriptionEngine, TranscriptionSettings};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Synchronize audiobooks with their EPUBs.
#[derive(Debug, Parser)]
#[command(name = "narration-sync", version, about)]
struct Cli {
    /// Books to process, by uuid (see `storage.data_dir/books/`)
    #[arg(required = true)]
    books: Vec<Uuid>,

    /// Forget earlier progress and run every stage again
    #[arg(long)]
    restart: bool,

    /// JSON overrides applied on top of the loaded configuration
    #[arg(long, value_name = "JSON")]
    settings: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(settings) = &cli.settings {
        config.update_from_json(settings)?;
    }
    config.validate()?;

    info!("Starting narration-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", config.storage.data_dir.display());

    let store = JsonTaskStore::open(config.storage.data_dir.join("tasks.json")).await?;
    let ctx = PipelineContext {
        audio: Arc::new(FfmpegAudio::new(&config.audio)),
        engine: Arc::new(SidecarTranscriptionEngine::new(&config.transcription.sidecar_dir)),
        settings: TranscriptionSettings::default(),
        config: Arc::new(config.clone()),
    };
    let orchestrator = Orchestrator::new(Arc::new(store), ctx, EventBus::new(config.pipeline.event_capacity));

    let mut events = orchestrator.subscribe();
    let mut pending: HashSet<Uuid> = cli.books.iter().copied().collect();
    for book in &cli.books {
        orchestrator.start(*book, cli.restart)?;
    }

    let mut failed = 0;
    let mut cancelled = false;
    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let EventKind::TaskProgressUpdated { task_type, progress } = &event.kind {
                        info!("Book {}: {} {:.0}%", event.book_uuid, task_type.as_str(), progress * 100.0);
                    }
                    if event.kind.is_terminal() && pending.remove(&event.book_uuid) {
                        match &event.kind {
                            EventKind::ProcessingFailed { error, .. } => {
                                failed += 1;
                                error!("Book {} failed: {}", event.book_uuid, error);
                            }
                            EventKind::ProcessingStopped => warn!("Book {} stopped", event.book_uuid),
                            _ => info!("Book {} synchronized", event.book_uuid),
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} pipeline events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                info!("Interrupt received, stopping after the current step");
                cancelled = true;
                for book in &pending {
                    orchestrator.cancel(*book)?;
                }
            }
        }
    }

    orchestrator.shutdown().await?;
    if failed > 0 {
        return Err(anyhow::anyhow!("{} book(s) failed", failed));
    }
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "info", "narration_sync=trace")
/// - If not set, defaults to "narration_sync=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "narration_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
