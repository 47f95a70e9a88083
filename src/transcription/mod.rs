//! # Transcription Module
//!
//! Word timelines produced by a speech recognizer, and the engine seam the
//! pipeline transcribes through.
//!
//! ## Key Components:
//! - **Transcription / WordTimelineEntry**: the recognizer's output for one audio file
//! - **TranscriptionEngine**: async trait any recognizer backend implements
//! - **SidecarTranscriptionEngine**: reads timelines computed ahead of time
//!
//! ## JSON Format:
//! Transcriptions are stored as camelCase JSON, one file per processed audio
//! file, so a run can resume without transcribing again:
//! ```json
//! { "transcript": "Call me Ishmael.",
//!   "wordTimeline": [{ "word": "Call", "startTime": 0.0, "endTime": 0.4, "audiofile": "00001.mp3" }] }
//! ```

pub mod engine;

pub use engine::{SidecarTranscriptionEngine, TranscriptionEngine, TranscriptionSettings};

use serde::{Deserialize, Serialize};

/// One recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTimelineEntry {
    pub word: String,
    /// Seconds from the start of `audiofile`
    pub start_time: f64,
    pub end_time: f64,
    pub audiofile: String,
}

/// Recognizer output for one audio file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub transcript: String,
    #[serde(default)]
    pub word_timeline: Vec<WordTimelineEntry>,
}

impl Transcription {
    /// Build a transcription from its timeline, joining the words as the transcript.
    pub fn from_timeline(word_timeline: Vec<WordTimelineEntry>) -> Self {
        let transcript = word_timeline
            .iter()
            .map(|entry| entry.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            transcript,
            word_timeline,
        }
    }

    /// End time of the last recognized word.
    pub fn duration(&self) -> f64 {
        self.word_timeline.last().map(|entry| entry.end_time).unwrap_or(0.0)
    }
}
