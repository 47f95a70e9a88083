//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables (with `SYNC_` prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`SYNC_STORAGE_DATA_DIR`, `SYNC_ALIGNMENT_LOOKAHEAD_WORDS`, ...)
//! 2. Configuration file (`config.toml`)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration.
///
/// Broken into logical groups so each pipeline stage only sees the settings
/// it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub alignment: AlignmentConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub pipeline: PipelineConfig,
}

/// Where books, intermediate artifacts and task rows live.
///
/// ## Layout under `data_dir`:
/// - `books/{uuid}/original/book.epub` and `books/{uuid}/original/audio/*`
/// - `books/{uuid}/processed/audio/*` (output of the split stage)
/// - `books/{uuid}/transcriptions/*.json` (output of the transcribe stage)
/// - `books/{uuid}/synced/{uuid}.epub` (output of the sync stage)
/// - `tasks.json` (persistent task rows)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Tuning for the alignment engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// How many timeline words past the cursor a sentence may be searched for
    pub lookahead_words: usize,
    /// How many leading sentences are tried when locating a chapter's start
    pub chapter_search_sentences: usize,
    /// Sentences with more words than this are located by head/tail anchors
    pub max_needle_words: usize,
    /// Words in a head or tail anchor
    pub anchor_words: usize,
    /// Length in seconds given to trailing sentences that were never heard
    pub trailing_sliver: f64,
}

/// Settings for the split/transcode stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Target codec (e.g. "libopus"); `None` keeps the source codec
    pub codec: Option<String>,
    /// Target bitrate (e.g. "32k"); only used with a codec
    pub bitrate: Option<String>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

/// Settings for the transcription stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Locale passed to the engine when the book declares none
    pub default_locale: String,
    /// Directory holding pre-computed `{stem}.json` word timelines
    pub sidecar_dir: PathBuf,
    /// Upper bound on words placed in the recognizer prompt
    pub prompt_max_words: usize,
}

/// Worker orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the broadcast channel carrying book events
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
            },
            alignment: AlignmentConfig {
                lookahead_words: 150,
                chapter_search_sentences: 10,
                max_needle_words: 8,
                anchor_words: 4,
                trailing_sliver: 0.25,
            },
            audio: AudioConfig {
                codec: None,
                bitrate: None,
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
            },
            transcription: TranscriptionConfig {
                default_locale: "en-US".to_string(),
                sidecar_dir: PathBuf::from("./data/sidecar"),
                prompt_max_words: 50,
            },
            pipeline: PipelineConfig {
                event_capacity: 256,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// `DATA_DIR` is honoured as a shorthand for `storage.data_dir`, the way
    /// deployment platforms usually hand out a writable volume.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("SYNC")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(data_dir) = env::var("DATA_DIR") {
            settings = settings.set_override("storage.data_dir", data_dir)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.alignment.lookahead_words == 0 {
            return Err(anyhow::anyhow!("Alignment lookahead must be greater than 0"));
        }

        if self.alignment.anchor_words == 0
            || self.alignment.anchor_words > self.alignment.max_needle_words
        {
            return Err(anyhow::anyhow!(
                "Anchor words must be between 1 and max_needle_words ({})",
                self.alignment.max_needle_words
            ));
        }

        if self.alignment.trailing_sliver <= 0.0 {
            return Err(anyhow::anyhow!("Trailing sliver must be positive"));
        }

        if self.pipeline.event_capacity == 0 {
            return Err(anyhow::anyhow!("Event channel capacity must be greater than 0"));
        }

        if self.audio.bitrate.is_some() && self.audio.codec.is_none() {
            return Err(anyhow::anyhow!("A bitrate requires an explicit codec"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string, touching only provided fields.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(storage) = partial_config.get("storage") {
            if let Some(dir) = storage.get("data_dir").and_then(|v| v.as_str()) {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(alignment) = partial_config.get("alignment") {
            if let Some(words) = alignment.get("lookahead_words").and_then(|v| v.as_u64()) {
                self.alignment.lookahead_words = words as usize;
            }
            if let Some(count) = alignment.get("chapter_search_sentences").and_then(|v| v.as_u64()) {
                self.alignment.chapter_search_sentences = count as usize;
            }
            if let Some(words) = alignment.get("max_needle_words").and_then(|v| v.as_u64()) {
                self.alignment.max_needle_words = words as usize;
            }
            if let Some(words) = alignment.get("anchor_words").and_then(|v| v.as_u64()) {
                self.alignment.anchor_words = words as usize;
            }
            if let Some(sliver) = alignment.get("trailing_sliver").and_then(|v| v.as_f64()) {
                self.alignment.trailing_sliver = sliver;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(codec) = audio.get("codec").and_then(|v| v.as_str()) {
                self.audio.codec = Some(codec.to_string());
            }
            if let Some(bitrate) = audio.get("bitrate").and_then(|v| v.as_str()) {
                self.audio.bitrate = Some(bitrate.to_string());
            }
            if let Some(path) = audio.get("ffmpeg_path").and_then(|v| v.as_str()) {
                self.audio.ffmpeg_path = path.to_string();
            }
            if let Some(path) = audio.get("ffprobe_path").and_then(|v| v.as_str()) {
                self.audio.ffprobe_path = path.to_string();
            }
        }

        if let Some(transcription) = partial_config.get("transcription") {
            if let Some(locale) = transcription.get("default_locale").and_then(|v| v.as_str()) {
                self.transcription.default_locale = locale.to_string();
            }
            if let Some(dir) = transcription.get("sidecar_dir").and_then(|v| v.as_str()) {
                self.transcription.sidecar_dir = PathBuf::from(dir);
            }
            if let Some(words) = transcription.get("prompt_max_words").and_then(|v| v.as_u64()) {
                self.transcription.prompt_max_words = words as usize;
            }
        }

        if let Some(pipeline) = partial_config.get("pipeline") {
            if let Some(capacity) = pipeline.get("event_capacity").and_then(|v| v.as_u64()) {
                self.pipeline.event_capacity = capacity as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.alignment.lookahead_words, 150);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.alignment.lookahead_words = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bitrate = Some("32k".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"alignment": {"lookahead_words": 300}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.alignment.lookahead_words, 300);
        assert_eq!(config.alignment.anchor_words, 4);
    }

    #[test]
    fn test_config_update_every_section() {
        let mut config = AppConfig::default();
        let json = r#"{
            "alignment": {"max_needle_words": 12, "anchor_words": 5},
            "audio": {"codec": "libopus", "bitrate": "32k", "ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg"},
            "transcription": {"default_locale": "es-ES", "sidecar_dir": "/srv/sidecar", "prompt_max_words": 20},
            "pipeline": {"event_capacity": 64}
        }"#;
        config.update_from_json(json).unwrap();

        assert_eq!(config.alignment.max_needle_words, 12);
        assert_eq!(config.alignment.anchor_words, 5);
        assert_eq!(config.audio.codec.as_deref(), Some("libopus"));
        assert_eq!(config.audio.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.audio.ffprobe_path, "ffprobe");
        assert_eq!(config.transcription.default_locale, "es-ES");
        assert_eq!(config.transcription.sidecar_dir, PathBuf::from("/srv/sidecar"));
        assert_eq!(config.transcription.prompt_max_words, 20);
        assert_eq!(config.pipeline.event_capacity, 64);
    }

    #[test]
    fn test_anchor_words_beyond_needle_is_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"alignment": {"anchor_words": 9}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"alignment": {"trailing_sliver": -1.0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
