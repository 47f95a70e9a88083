//! Phrase search by phonetic equality.
//!
//! Two words sound alike when their code sets intersect. A phrase matches
//! at a position when every word of it sounds like the word it lines up with.

use super::encoder::encode_with;
use super::rules::{self, RuleIndex};
use crate::error::SyncResult;
use crate::text::{tokenize_words, Language};
use std::collections::{BTreeSet, HashMap};

/// Compares words by phonetic code, memoizing each surface word's codes.
pub struct PhoneticMatcher<'a> {
    index: &'a RuleIndex,
    language: Language,
    cache: HashMap<String, BTreeSet<String>>,
}

impl<'a> PhoneticMatcher<'a> {
    pub fn new(index: &'a RuleIndex, language: Language) -> Self {
        Self {
            index,
            language,
            cache: HashMap::new(),
        }
    }

    /// Phonetic codes of `word`, computed once per distinct word.
    pub fn codes(&mut self, word: &str) -> &BTreeSet<String> {
        if !self.cache.contains_key(word) {
            let codes = encode_with(self.index, word, self.language);
            self.cache.insert(word.to_string(), codes);
        }
        &self.cache[word]
    }

    /// True when the two words share at least one code. Empty words never match.
    pub fn words_match(&mut self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        let a_codes = self.codes(a).clone();
        !a_codes.is_disjoint(self.codes(b))
    }

    /// Index of the first haystack word where the whole needle matches word for word.
    pub fn find_match_words<S: AsRef<str>, T: AsRef<str>>(&mut self, needle: &[S], haystack: &[T]) -> Option<usize> {
        let first = needle.first()?.as_ref();
        if haystack.len() < needle.len() {
            return None;
        }

        (0..=haystack.len() - needle.len()).find(|&start| {
            self.words_match(first, haystack[start].as_ref())
                && needle[1..]
                    .iter()
                    .zip(&haystack[start + 1..])
                    .all(|(n, h)| self.words_match(n.as_ref(), h.as_ref()))
        })
    }

    /// Tokenize both phrases and search the haystack for the needle.
    pub fn find_match(&mut self, needle: &str, haystack: &str) -> Option<usize> {
        let needle: Vec<String> = tokenize_words(needle).into_iter().map(|t| t.text).collect();
        let haystack: Vec<String> = tokenize_words(haystack).into_iter().map(|t| t.text).collect();
        self.find_match_words(&needle, &haystack)
    }
}

/// Word index in `haystack` where a phonetically equivalent copy of `needle` starts.
pub fn find_match(needle: &str, haystack: &str, language: Language) -> SyncResult<Option<usize>> {
    let index = rules::global()?;
    Ok(PhoneticMatcher::new(index, language).find_match(needle, haystack))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_match_exact_phrase() {
        let found = find_match("this is a test", "well this is a test indeed", Language::English).unwrap();
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_find_match_absent() {
        let found = find_match("quantum physics", "well this is a test indeed", Language::English).unwrap();
        assert_eq!(found, None);
        assert_eq!(find_match("", "anything", Language::English).unwrap(), None);
        assert_eq!(find_match("too long a needle", "short", Language::English).unwrap(), None);
    }

    #[test]
    fn test_find_match_tolerates_misspelling() {
        let found = find_match("Mr. Rodriquez spoke", "then mister rodriguez spoke softly", Language::English).unwrap();
        assert_eq!(found, None);

        let found = find_match("Rodriquez spoke", "then mister rodriguez spoke softly", Language::English).unwrap();
        assert_eq!(found, Some(2));
    }

    #[test]
    fn test_matcher_caches_codes() {
        let index = rules::global().unwrap();
        let mut matcher = PhoneticMatcher::new(index, Language::English);
        assert!(matcher.words_match("phone", "fone"));
        assert!(matcher.cache.contains_key("phone"));
        assert!(!matcher.words_match("", ""));
    }
}
