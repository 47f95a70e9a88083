//! # Stage Bodies
//!
//! The work behind each [`TaskType`]. Every stage reads the previous stage's
//! artifacts from the book's [`BookLayout`] and reuses its own outputs from
//! an earlier run, so a resumed book never redoes finished files.
//!
//! ## Stages:
//! - **SPLIT_CHAPTERS**: one processed track per embedded chapter (or per file)
//! - **TRANSCRIBE_CHAPTERS**: one cached word timeline per processed track
//! - **SYNC_CHAPTERS**: media overlays written into `synced/{book}.epub`

use super::layout::{list_audio_files, write_atomic, BookLayout};
use super::task::TaskType;
use crate::audio::{extension_for_codec, media_type_for, AudioTools};
use crate::config::AppConfig;
use crate::epub::Epub;
use crate::error::{SyncError, SyncResult};
use crate::sync::{AudioAsset, SyncOptions, Synchronizer};
use crate::text::{transcription_prompt, Language};
use crate::transcription::{Transcription, TranscriptionEngine, TranscriptionSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators shared by every stage.
///
/// Cheap to clone; the orchestrator hands one copy to its worker task.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<AppConfig>,
    /// Inspection, splitting and transcoding of narration files
    pub audio: Arc<dyn AudioTools>,
    /// Speech recognizer producing word timelines
    pub engine: Arc<dyn TranscriptionEngine>,
    pub settings: TranscriptionSettings,
}

/// Reports a stage's progress back to the worker.
///
/// Backed by a `watch` channel: only the latest fraction matters, so a slow
/// reader skips intermediate values instead of queueing them.
pub struct StageProgress(watch::Sender<f64>);

impl StageProgress {
    pub fn new(sender: watch::Sender<f64>) -> Self {
        Self(sender)
    }

    pub fn report(&self, fraction: f64) {
        self.0.send_replace(fraction.clamp(0.0, 1.0));
    }
}

/// Run one stage of one book.
///
/// ## Parameters:
/// - `task_type`: which stage to run
/// - `layout`: where the book's inputs and outputs live
/// - `cancel`: checked between files; a tripped token yields `SyncError::Cancelled`
/// - `progress`: receives the fraction of the stage's files done
///
/// ## Resuming:
/// Outputs only ever appear at their final path once complete, so files
/// left by an earlier run are reused as they are.
pub async fn run_stage(
    task_type: TaskType,
    ctx: &PipelineContext,
    layout: &BookLayout,
    cancel: &CancellationToken,
    progress: StageProgress,
) -> SyncResult<()> {
    match task_type {
        TaskType::SplitChapters => split_chapters(ctx, layout, cancel, &progress).await,
        TaskType::TranscribeChapters => transcribe_chapters(ctx, layout, cancel, &progress).await,
        TaskType::SyncChapters => sync_chapters(ctx, layout, cancel, progress).await,
    }
}

fn check_cancelled(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

fn track_path(dir: &Path, track: usize, extension: &str) -> PathBuf {
    dir.join(format!("{:05}.{}", track, extension))
}

/// One numbered track per embedded chapter of each input file, or per file
/// when it has at most one chapter.
async fn split_chapters(
    ctx: &PipelineContext,
    layout: &BookLayout,
    cancel: &CancellationToken,
    progress: &StageProgress,
) -> SyncResult<()> {
    let files = list_audio_files(&layout.original_audio_dir()).await?;
    if files.is_empty() {
        return Err(SyncError::Audio(format!(
            "no audio files in {}",
            layout.original_audio_dir().display()
        )));
    }

    let output_dir = layout.processed_audio_dir();
    tokio::fs::create_dir_all(&output_dir).await?;

    let codec = ctx.config.audio.codec.as_deref();
    let bitrate = ctx.config.audio.bitrate.as_deref();
    let mut track = 0;

    for (index, file) in files.iter().enumerate() {
        check_cancelled(cancel)?;

        let source_extension = file.extension().map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        let extension = codec
            .and_then(extension_for_codec)
            .map(str::to_string)
            .or(source_extension)
            .unwrap_or_else(|| "mp3".to_string());

        let chapters = ctx.audio.chapters(file).await?;
        if chapters.len() > 1 {
            // Chapter tables sometimes run past the end of the stream
            let duration = ctx.audio.duration(file).await?;
            debug!("Splitting {} ({:.1}s) into {} chapters", file.display(), duration, chapters.len());
            for chapter in &chapters {
                check_cancelled(cancel)?;
                track += 1;
                let dest = track_path(&output_dir, track, &extension);
                ctx.audio
                    .split_track(file, chapter.start, chapter.end.min(duration), &dest, codec, bitrate)
                    .await?;
            }
        } else {
            track += 1;
            let dest = track_path(&output_dir, track, &extension);
            if tokio::fs::try_exists(&dest).await? {
                debug!("Keeping existing track {}", dest.display());
            } else {
                ctx.audio.transcode_track(file, &dest, codec, bitrate).await?;
            }
        }

        progress.report((index + 1) as f64 / files.len() as f64);
    }

    info!("Prepared {} tracks from {} audio files", track, files.len());
    Ok(())
}

/// Text of every spine chapter that parses, joined by line breaks.
fn book_text(epub: &Epub) -> String {
    epub.spine()
        .iter()
        .filter(|item| item.is_xhtml())
        .filter_map(|item| epub.item_text(&item.id).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcribe every processed track into `transcriptions/{stem}.json`,
/// prompting the recognizer with the book's unusual words.
async fn transcribe_chapters(
    ctx: &PipelineContext,
    layout: &BookLayout,
    cancel: &CancellationToken,
    progress: &StageProgress,
) -> SyncResult<()> {
    let files = list_audio_files(&layout.processed_audio_dir()).await?;
    if files.is_empty() {
        return Err(SyncError::Audio("no processed audio to transcribe".to_string()));
    }

    let epub = Epub::from_bytes(&tokio::fs::read(layout.original_epub()).await?)?;
    let locale = epub
        .language()
        .unwrap_or_else(|| ctx.config.transcription.default_locale.clone());
    let language = Language::from_locale(&locale);
    let prompt = transcription_prompt(&book_text(&epub), ctx.config.transcription.prompt_max_words, language);
    debug!("Transcription prompt for locale {}: {:?}", locale, prompt);

    tokio::fs::create_dir_all(layout.transcriptions_dir()).await?;

    for (index, file) in files.iter().enumerate() {
        check_cancelled(cancel)?;

        let dest = layout.transcription_path(file);
        if tokio::fs::try_exists(&dest).await? {
            debug!("Reusing transcription {}", dest.display());
        } else {
            let transcription = tokio::select! {
                result = ctx.engine.transcribe(file, prompt.as_deref(), &locale, &ctx.settings) => result?,
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            };
            write_atomic(&dest, &serde_json::to_vec_pretty(&transcription)?).await?;
        }

        progress.report((index + 1) as f64 / files.len() as f64);
    }

    info!("Transcribed {} tracks", files.len());
    Ok(())
}

/// Embed the processed tracks and media overlays into a copy of the book.
///
/// The synchronizer is CPU bound, so it runs on the blocking pool.
async fn sync_chapters(
    ctx: &PipelineContext,
    layout: &BookLayout,
    cancel: &CancellationToken,
    progress: StageProgress,
) -> SyncResult<()> {
    let files = list_audio_files(&layout.processed_audio_dir()).await?;
    let mut transcriptions = Vec::with_capacity(files.len());
    let mut audio = Vec::with_capacity(files.len());

    for file in &files {
        let path = layout.transcription_path(file);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SyncError::Transcription(format!("missing transcription {}: {}", path.display(), e)))?;
        transcriptions.push(serde_json::from_slice::<Transcription>(&bytes)?);

        let file_name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        audio.push(AudioAsset {
            audiofile: file.to_string_lossy().into_owned(),
            href: format!("Audio/{}", file_name),
            media_type: media_type_for(file).to_string(),
            content: tokio::fs::read(file).await?,
        });
    }

    let epub_bytes = tokio::fs::read(layout.original_epub()).await?;
    let options = SyncOptions::from(ctx.config.as_ref());
    let dest = layout.synced_epub();
    let cancel = cancel.clone();

    let report = tokio::task::spawn_blocking(move || {
        let mut epub = Epub::from_bytes(&epub_bytes)?;
        let synchronizer = Synchronizer::new(&transcriptions, audio, options);
        let report = synchronizer.sync_book(&mut epub, &cancel, &mut |fraction| progress.report(fraction))?;
        epub.save(&dest)?;
        Ok::<_, SyncError>(report)
    })
    .await
    .map_err(|e| SyncError::Worker(format!("sync job failed: {}", e)))??;

    for failure in &report.failures {
        warn!("Chapter {} has no overlay: {}", failure.chapter_id, failure.error);
    }
    info!(
        "Wrote {} ({} of {} chapters synchronized)",
        layout.synced_epub().display(),
        report.chapters_synced,
        report.chapters_total
    );
    Ok(())
}
