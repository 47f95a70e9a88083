//! # Text Processing Module
//!
//! Language-aware text utilities used by every other stage of the pipeline.
//!
//! ## Key Components:
//! - **Segmenter**: splits a block of text into sentences (abbreviation aware)
//! - **Words**: word tokenization with offsets, bag-of-words, recognizer prompts
//! - **Language**: maps a book locale onto the rule sets we ship

pub mod segmenter;
pub mod words;

pub use segmenter::{segment, sentence_spans};
pub use words::{bag_of_words, normalize_word, tokenize_words, transcription_prompt, WordToken};

use serde::{Deserialize, Serialize};

/// Languages with dedicated segmentation and phonetic rules.
///
/// Anything we do not recognise falls back to `Generic`, whose phonetic
/// outputs carry per-language masks instead of assuming one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
    Generic,
}

impl Language {
    /// Resolve a BCP-47 style locale ("en-US", "es", "es_MX") to a language.
    pub fn from_locale(locale: &str) -> Self {
        let primary = locale
            .split(|c| c == '-' || c == '_')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        match primary.as_str() {
            "en" | "eng" => Language::English,
            "es" | "spa" => Language::Spanish,
            _ => Language::Generic,
        }
    }

    /// Bit used for this language in phonetic output masks.
    pub fn mask(&self) -> u32 {
        match self {
            Language::English => 1,
            Language::Spanish => 2,
            Language::Generic => u32::MAX,
        }
    }

    /// Key used for this language in the embedded rule files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Spanish => "spanish",
            Language::Generic => "generic",
        }
    }
}
