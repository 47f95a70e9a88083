//! Word-level helpers: tokenization with offsets, bag-of-words and the
//! recognizer prompt built from a book's invented words.

use super::{segmenter, Language};
use std::collections::{BTreeSet, HashSet};

/// A normalized word and its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordToken {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

fn is_word_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '–' | '—' | '/' | '…')
}

/// Lowercase a word and drop everything that is not a letter or digit.
///
/// Apostrophes vanish too, so "don't" and a recognizer's "dont" compare equal.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Split text into normalized words, keeping the byte span of each.
///
/// Dashes and slashes separate words; tokens that normalize to nothing
/// (bare punctuation) are dropped.
pub fn tokenize_words(text: &str) -> Vec<WordToken> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (offset, c) in text.char_indices() {
        if is_word_separator(c) {
            if let Some(s) = start.take() {
                push_token(text, s, offset, &mut tokens);
            }
        } else if start.is_none() {
            start = Some(offset);
        }
    }

    if let Some(s) = start {
        push_token(text, s, text.len(), &mut tokens);
    }

    tokens
}

fn push_token(text: &str, start: usize, end: usize, tokens: &mut Vec<WordToken>) {
    let normalized = normalize_word(&text[start..end]);
    if !normalized.is_empty() {
        tokens.push(WordToken {
            text: normalized,
            start,
            end,
        });
    }
}

/// Deduplicated, lower-cased, normalized set of the words in `text`.
///
/// Purely numeric tokens are left out; they never help a recognizer.
pub fn bag_of_words(text: &str) -> BTreeSet<String> {
    tokenize_words(text)
        .into_iter()
        .map(|token| token.text)
        .filter(|word| !word.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Build a recognizer prompt from the book's invented words.
///
/// A word counts as invented when it only ever appears capitalized and at
/// least once away from the start of a sentence (so it is not capitalized
/// merely by position). Those are the names and coinages a recognizer is most
/// likely to misspell.
pub fn transcription_prompt(text: &str, max_words: usize, language: Language) -> Option<String> {
    let mut seen_lowercase: HashSet<String> = HashSet::new();
    let mut candidates: Vec<(String, String)> = Vec::new();
    let mut candidate_keys: HashSet<String> = HashSet::new();

    for sentence in segmenter::segment(text, language) {
        for (index, raw) in sentence.split(is_word_separator).enumerate() {
            let trimmed = raw.trim_matches(|c: char| !c.is_alphanumeric());
            let key = normalize_word(trimmed);
            if key.is_empty() || key.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            let capitalized = trimmed.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            if !capitalized {
                seen_lowercase.insert(key);
                continue;
            }

            if index > 0 && candidate_keys.insert(key.clone()) {
                candidates.push((key, trimmed.to_string()));
            }
        }
    }

    let words: Vec<String> = candidates
        .into_iter()
        .filter(|(key, _)| !seen_lowercase.contains(key))
        .map(|(_, word)| word)
        .take(max_words)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("Don't!"), "dont");
        assert_eq!(normalize_word("“Hello,”"), "hello");
        assert_eq!(normalize_word("..."), "");
    }

    #[test]
    fn test_tokenize_keeps_offsets() {
        let text = "Well—this is a well-known test.";
        let tokens = tokenize_words(text);
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["well", "this", "is", "a", "well", "known", "test"]);
        assert_eq!(&text[tokens[1].start..tokens[1].end], "this");
        assert_eq!(&text[tokens[6].start..tokens[6].end], "test.");
    }

    #[test]
    fn test_bag_of_words_dedupes_and_lowercases() {
        let bag = bag_of_words("The cat saw the Cat. 1984 cats!");
        let words: Vec<&str> = bag.iter().map(|w| w.as_str()).collect();
        assert_eq!(words, vec!["cat", "cats", "saw", "the"]);
    }

    #[test]
    fn test_transcription_prompt_finds_invented_words() {
        let text = "The ship left Arrakis at dawn. Paul watched. Later, Paul and Chani spoke. \
                    The Fremen knew. A fremen? No.";
        let prompt = transcription_prompt(text, 10, Language::English).unwrap();
        assert!(prompt.contains("Arrakis"));
        assert!(prompt.contains("Paul"));
        assert!(prompt.contains("Chani"));
        // "Fremen" also appears lowercase, so it is an ordinary word here
        assert!(!prompt.contains("Fremen"));
    }

    #[test]
    fn test_transcription_prompt_empty() {
        assert_eq!(transcription_prompt("all lowercase words here.", 10, Language::English), None);
    }
}
