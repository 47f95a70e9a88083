//! # Phonetic Matching
//!
//! Decides whether two words "sound the same" so that alignment survives
//! recognizer misspellings ("Rodriquez" for "Rodriguez").
//!
//! ## Key Components:
//! - **Rules**: declarative rewrite rules, embedded TOML, indexed once
//! - **Encoder**: word → set of phonetic codes via three rule passes
//! - **Matcher**: phrase search where words compare by code intersection
//! - **Pattern parser**: the tiny regex dialect used in rule contexts

pub mod encoder;
pub mod matcher;
pub mod regex_parser;
pub mod rules;

pub use matcher::{find_match, PhoneticMatcher};
pub use rules::{RuleIndex, Stage};

use crate::error::SyncResult;
use crate::text::Language;
use std::collections::BTreeSet;

/// Phonetic codes for a word using the embedded rule set.
pub fn encode(word: &str, language: Language) -> SyncResult<BTreeSet<String>> {
    Ok(encoder::encode_with(rules::global()?, word, language))
}
