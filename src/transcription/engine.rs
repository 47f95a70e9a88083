//! # Transcription Engine
//!
//! The recognizer is a black box behind [`TranscriptionEngine`]. The crate
//! ships one backend, [`SidecarTranscriptionEngine`], which loads word
//! timelines an external recognizer already wrote next to the audio.
//!
//! ## Key Responsibilities:
//! - **Audio-to-timeline**: one [`Transcription`] per processed audio file
//! - **Prompting**: an optional prompt of invented words improves spelling
//! - **Attribution**: every returned entry names the audio file it came from

use super::Transcription;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Knobs forwarded to the recognizer.
///
/// ## Tuning Parameters:
/// Backends are free to ignore settings they have no use for.
#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    /// Backend-specific model name
    pub model: String,

    /// Temperature for model sampling (0.0 = deterministic)
    pub temperature: f32,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.0, // Deterministic output so reruns line up
        }
    }
}

/// A speech-to-text backend producing word timelines.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe one audio file.
    ///
    /// ## Parameters:
    /// - **audio_path**: processed audio file to transcribe
    /// - **prompt**: comma-separated words the recognizer should expect
    /// - **locale**: BCP-47 locale of the narration
    /// - **settings**: backend tuning
    async fn transcribe(
        &self,
        audio_path: &Path,
        prompt: Option<&str>,
        locale: &str,
        settings: &TranscriptionSettings,
    ) -> SyncResult<Transcription>;
}

/// Reads `{sidecar_dir}/{audio stem}.json` instead of running a model.
///
/// The JSON has the [`Transcription`] shape. Entries are re-attributed to the
/// requested audio file, so sidecars can be produced without knowing where
/// the pipeline keeps its processed audio.
#[derive(Debug, Clone)]
pub struct SidecarTranscriptionEngine {
    sidecar_dir: PathBuf,
}

impl SidecarTranscriptionEngine {
    pub fn new(sidecar_dir: impl Into<PathBuf>) -> Self {
        Self {
            sidecar_dir: sidecar_dir.into(),
        }
    }

    fn sidecar_path(&self, audio_path: &Path) -> SyncResult<PathBuf> {
        let stem = audio_path
            .file_stem()
            .ok_or_else(|| SyncError::Transcription(format!("{} has no file name", audio_path.display())))?;
        Ok(self.sidecar_dir.join(format!("{}.json", stem.to_string_lossy())))
    }
}

#[async_trait]
impl TranscriptionEngine for SidecarTranscriptionEngine {
    async fn transcribe(
        &self,
        audio_path: &Path,
        prompt: Option<&str>,
        locale: &str,
        settings: &TranscriptionSettings,
    ) -> SyncResult<Transcription> {
        let start_time = Instant::now();
        let path = self.sidecar_path(audio_path)?;

        debug!(
            "Transcribing {} from sidecar {} (locale {}, model {}, prompt {:?})",
            audio_path.display(),
            path.display(),
            locale,
            settings.model,
            prompt
        );

        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            SyncError::Transcription(format!("no sidecar transcript at {}: {}", path.display(), e))
        })?;
        let mut transcription: Transcription = serde_json::from_str(&contents)?;

        let audiofile = audio_path.to_string_lossy().into_owned();
        for entry in &mut transcription.word_timeline {
            entry.audiofile = audiofile.clone();
        }
        if transcription.transcript.is_empty() && !transcription.word_timeline.is_empty() {
            transcription = Transcription::from_timeline(std::mem::take(&mut transcription.word_timeline));
        }

        info!(
            "Transcribed {} ({} words, {:.1}s of audio) in {}ms",
            audio_path.display(),
            transcription.word_timeline.len(),
            transcription.duration(),
            start_time.elapsed().as_millis()
        );

        Ok(transcription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sidecar_reattributes_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("00001.json"),
            r#"{"transcript": "", "wordTimeline": [
                {"word": "Call", "startTime": 0.0, "endTime": 0.3, "audiofile": "whatever.wav"},
                {"word": "me", "startTime": 0.3, "endTime": 0.5, "audiofile": "whatever.wav"}
            ]}"#,
        )
        .unwrap();

        let engine = SidecarTranscriptionEngine::new(dir.path());
        let audio = Path::new("/books/b/processed/audio/00001.mp3");
        let transcription = engine
            .transcribe(audio, Some("Ishmael"), "en-US", &TranscriptionSettings::default())
            .await
            .unwrap();

        assert_eq!(transcription.transcript, "Call me");
        assert!(transcription
            .word_timeline
            .iter()
            .all(|entry| entry.audiofile == "/books/b/processed/audio/00001.mp3"));
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_transcription_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SidecarTranscriptionEngine::new(dir.path());
        let result = engine
            .transcribe(Path::new("00002.mp3"), None, "en-US", &TranscriptionSettings::default())
            .await;
        assert!(matches!(result, Err(SyncError::Transcription(_))));
    }
}
