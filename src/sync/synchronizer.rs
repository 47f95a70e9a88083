//! # Synchronizer
//!
//! Drives a whole book through tagging, alignment and SMIL emission and wires
//! the result into the EPUB package.
//!
//! ## Per chapter (spine order):
//! 1. Tag the chapter's sentences
//! 2. Align them from the cursor the previous chapter left behind
//! 3. Interpolate gaps (seeded with the previous chapter's last range) and
//!    give unheard trailing sentences a sliver each
//! 4. Write the tagged XHTML and its SMIL overlay, link them in the manifest
//!
//! A chapter that fails to parse is logged and reported but does not stop
//! the book. Cancellation is checked between chapters.

use super::alignment::{get_chapter_duration, AlignmentOptions, Aligner, SentenceRange, TimelineCursor};
use super::interpolate::{fill_trailing_sentences, interpolate_sentence_ranges};
use super::smil::{build_smil, format_duration};
use super::tagger::tag_sentences;
use crate::config::AppConfig;
use crate::epub::{relative_href, Epub, ManifestItem};
use crate::error::{SyncError, SyncResult};
use crate::text::Language;
use crate::transcription::Transcription;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SMIL_MEDIA_TYPE: &str = "application/smil+xml";
const ACTIVE_CLASS: &str = "-epub-media-overlay-active";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub alignment: AlignmentOptions,
    /// Seconds given to each trailing sentence with no audio
    pub trailing_sliver: f64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            alignment: AlignmentOptions::from(&config.alignment),
            trailing_sliver: config.alignment.trailing_sliver,
        }
    }
}

/// An audio file to embed in the book.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    /// The value timeline entries carry in their `audiofile` field
    pub audiofile: String,
    /// Manifest href, relative to the package document
    pub href: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterFailure {
    pub chapter_id: String,
    pub error: String,
}

/// Outcome of synchronizing one book.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub chapters_total: usize,
    pub chapters_synced: usize,
    /// Chapters none of whose sentences were heard
    pub chapters_skipped: usize,
    pub failures: Vec<ChapterFailure>,
    /// Sum of the synced chapters' durations, in seconds
    pub total_duration: f64,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.chapters_skipped == 0
    }
}

struct ChapterOutcome {
    next_cursor: TimelineCursor,
    last_range: Option<SentenceRange>,
    duration: f64,
}

/// Synchronizes books against one set of transcriptions.
pub struct Synchronizer<'a> {
    transcriptions: &'a [Transcription],
    audio: Vec<AudioAsset>,
    options: SyncOptions,
}

impl<'a> Synchronizer<'a> {
    pub fn new(transcriptions: &'a [Transcription], audio: Vec<AudioAsset>, options: SyncOptions) -> Self {
        Self {
            transcriptions,
            audio,
            options,
        }
    }

    /// Add media overlays to every spine chapter of `epub`.
    ///
    /// `progress` receives the cumulative fraction of chapters handled after
    /// each one, failed chapters included. Returns `SyncError::Cancelled` as
    /// soon as `cancel` fires between two chapters.
    pub fn sync_book(
        &self,
        epub: &mut Epub,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> SyncResult<SyncReport> {
        let language = Language::from_locale(epub.language().as_deref().unwrap_or("en"));
        let audio_paths = self.register_audio(epub)?;
        let mut aligner = Aligner::new(self.transcriptions, language, self.options.alignment.clone())?;

        let chapters: Vec<ManifestItem> = epub.spine().into_iter().filter(ManifestItem::is_xhtml).collect();
        let mut report = SyncReport {
            chapters_total: chapters.len(),
            ..SyncReport::default()
        };
        info!(
            "Synchronizing {} chapters against {} audio files ({})",
            chapters.len(),
            self.transcriptions.len(),
            language.as_str()
        );

        let mut cursor = TimelineCursor::default();
        let mut previous: Option<SentenceRange> = None;

        for (index, chapter) in chapters.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Synchronization cancelled before chapter {}", chapter.id);
                return Err(SyncError::Cancelled);
            }

            match self.sync_chapter(epub, &mut aligner, chapter, language, cursor, previous.as_ref(), &audio_paths) {
                Ok(Some(outcome)) => {
                    cursor = outcome.next_cursor;
                    if outcome.last_range.is_some() {
                        previous = outcome.last_range;
                    }
                    report.chapters_synced += 1;
                    report.total_duration += outcome.duration;
                }
                Ok(None) => {
                    debug!("No audio located for chapter {}", chapter.id);
                    report.chapters_skipped += 1;
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!("Skipping chapter {}: {}", chapter.id, err);
                    report.failures.push(ChapterFailure {
                        chapter_id: chapter.id.clone(),
                        error: err.to_string(),
                    });
                }
            }

            progress((index + 1) as f64 / chapters.len() as f64);
        }

        if report.chapters_synced > 0 {
            epub.add_metadata("media:duration", None, &format_duration(report.total_duration))?;
            epub.add_metadata("media:active-class", None, ACTIVE_CLASS)?;
        }

        info!(
            "Synchronized {}/{} chapters ({} skipped, {} failed)",
            report.chapters_synced,
            report.chapters_total,
            report.chapters_skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Store the audio files and map each `audiofile` to its archive path.
    fn register_audio(&self, epub: &mut Epub) -> SyncResult<HashMap<String, String>> {
        let mut paths = HashMap::with_capacity(self.audio.len());
        for (index, asset) in self.audio.iter().enumerate() {
            let item = ManifestItem::new(format!("audio{:05}", index + 1), &asset.href, &asset.media_type);
            epub.add_manifest_item(item, asset.content.clone())?;
            paths.insert(asset.audiofile.clone(), epub.resolve_href(&asset.href));
        }
        Ok(paths)
    }

    #[allow(clippy::too_many_arguments)]
    fn sync_chapter(
        &self,
        epub: &mut Epub,
        aligner: &mut Aligner<'_>,
        chapter: &ManifestItem,
        language: Language,
        cursor: TimelineCursor,
        previous: Option<&SentenceRange>,
        audio_paths: &HashMap<String, String>,
    ) -> SyncResult<Option<ChapterOutcome>> {
        let document = epub.read_xhtml(&chapter.id)?;
        let tagged = tag_sentences(&document, &chapter.id, language)?;

        let located = aligner.get_sentence_ranges(&tagged.sentences, cursor);
        if located.ranges.is_empty() {
            return Ok(None);
        }
        debug!(
            "Chapter {}: located {} of {} sentences",
            chapter.id,
            located.ranges.len(),
            tagged.sentences.len()
        );

        let ranges = interpolate_sentence_ranges(&located.ranges, previous);
        let ranges = fill_trailing_sentences(&ranges, tagged.sentences.len(), self.options.trailing_sliver);

        // Every clip must point inside the package; resolve before touching the chapter.
        let smil_href = format!("MediaOverlays/{}.smil", chapter.id);
        let smil_path = epub.resolve_href(&smil_href);
        let mut sources: HashMap<&str, String> = HashMap::new();
        for range in &ranges {
            if sources.contains_key(range.audiofile.as_str()) {
                continue;
            }
            let path = resolve_audio(audio_paths, &range.audiofile).ok_or_else(|| {
                SyncError::Epub(format!(
                    "chapter {} uses audio {} which is not part of the book",
                    chapter.id, range.audiofile
                ))
            })?;
            sources.insert(&range.audiofile, relative_href(&smil_path, path));
        }

        epub.write_xhtml(&chapter.id, &tagged.document)?;

        let chapter_path = epub.item_path(&chapter.id)?;
        let smil = build_smil(&chapter.id, &relative_href(&smil_path, &chapter_path), &ranges, |audiofile| {
            sources.get(audiofile).cloned().unwrap_or_default()
        });

        let smil_id = format!("{}_overlay", chapter.id);
        epub.add_manifest_item(ManifestItem::new(&smil_id, &smil_href, SMIL_MEDIA_TYPE), smil.to_xml().into_bytes())?;
        epub.set_media_overlay(&chapter.id, &smil_id)?;

        let duration = get_chapter_duration(&ranges);
        epub.add_metadata("media:duration", Some(&format!("#{}", smil_id)), &format_duration(duration))?;

        Ok(Some(ChapterOutcome {
            next_cursor: located.next_cursor,
            last_range: ranges.last().cloned(),
            duration,
        }))
    }
}

/// Archive path of the audio a timeline entry refers to.
///
/// Transcriptions cached by an earlier run may carry paths from another data
/// directory, so an unknown `audiofile` falls back to the one registered file
/// with the same name.
fn resolve_audio<'p>(audio_paths: &'p HashMap<String, String>, audiofile: &str) -> Option<&'p String> {
    if let Some(path) = audio_paths.get(audiofile) {
        return Some(path);
    }

    let name = Path::new(audiofile).file_name()?;
    let mut candidates = audio_paths
        .iter()
        .filter(|(registered, _)| Path::new(registered.as_str()).file_name() == Some(name));
    match (candidates.next(), candidates.next()) {
        (Some((_, path)), None) => Some(path),
        _ => None,
    }
}
