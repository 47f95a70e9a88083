//! # Alignment Engine
//!
//! Maps a chapter's sentences onto the book-wide word timeline.
//!
//! ## Strategy:
//! 1. **Chapter start**: the first of the leading sentences that can be found
//!    anywhere after the cursor fixes where the chapter begins.
//! 2. **Per sentence**: exact word equality inside a bounded window after the
//!    cursor, then phonetic matching, then the first window of the next file.
//! 3. **Long sentences**: located by their first few words and closed by
//!    their last few, so one misheard word in the middle does not lose them.
//!
//! Sentences that cannot be located get no range; interpolation fills them.

use crate::config::{AlignmentConfig, AppConfig};
use crate::error::SyncResult;
use crate::phonetic::{rules, PhoneticMatcher};
use crate::text::{tokenize_words, Language};
use crate::transcription::Transcription;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The audio time span assigned to one sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceRange {
    /// Sentence index within its chapter
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub audiofile: String,
}

/// Position in the book-wide timeline where alignment resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineCursor {
    pub file_index: usize,
    /// Index into the file's tokenized words
    pub word_index: usize,
}

#[derive(Debug, Clone)]
pub struct AlignmentOptions {
    pub lookahead_words: usize,
    pub chapter_search_sentences: usize,
    pub max_needle_words: usize,
    pub anchor_words: usize,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default().alignment)
    }
}

impl From<&AlignmentConfig> for AlignmentOptions {
    fn from(config: &AlignmentConfig) -> Self {
        Self {
            lookahead_words: config.lookahead_words.max(1),
            chapter_search_sentences: config.chapter_search_sentences,
            max_needle_words: config.max_needle_words.max(1),
            anchor_words: config.anchor_words.clamp(1, config.max_needle_words.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceRangeResult {
    pub ranges: Vec<SentenceRange>,
    pub next_cursor: TimelineCursor,
}

/// Tokenized words of one audio file, each pointing back at its timeline entry.
struct FileTimeline<'a> {
    transcription: &'a Transcription,
    words: Vec<String>,
    entry_of: Vec<usize>,
}

impl<'a> FileTimeline<'a> {
    fn new(transcription: &'a Transcription) -> Self {
        let mut words = Vec::new();
        let mut entry_of = Vec::new();
        for (index, entry) in transcription.word_timeline.iter().enumerate() {
            for token in tokenize_words(&entry.word) {
                words.push(token.text);
                entry_of.push(index);
            }
        }
        Self {
            transcription,
            words,
            entry_of,
        }
    }

    fn range(&self, id: usize, first_word: usize, last_word: usize) -> SentenceRange {
        let first = &self.transcription.word_timeline[self.entry_of[first_word]];
        let last = &self.transcription.word_timeline[self.entry_of[last_word]];
        SentenceRange {
            id,
            start: first.start_time,
            end: last.end_time.max(first.start_time),
            audiofile: first.audiofile.clone(),
        }
    }
}

/// Aligns chapters against one book's transcriptions.
///
/// Phonetic codes are memoized for the aligner's lifetime, so reuse one
/// aligner for every chapter of a book.
pub struct Aligner<'a> {
    files: Vec<FileTimeline<'a>>,
    matcher: PhoneticMatcher<'static>,
    options: AlignmentOptions,
}

impl<'a> Aligner<'a> {
    pub fn new(transcriptions: &'a [Transcription], language: Language, options: AlignmentOptions) -> SyncResult<Self> {
        Ok(Self {
            files: transcriptions.iter().map(FileTimeline::new).collect(),
            matcher: PhoneticMatcher::new(rules::global()?, language),
            options,
        })
    }

    /// Locate `sentences` in the timeline, starting at `cursor`.
    pub fn get_sentence_ranges(&mut self, sentences: &[String], cursor: TimelineCursor) -> SentenceRangeResult {
        let sentence_words: Vec<Vec<String>> = sentences
            .iter()
            .map(|sentence| tokenize_words(sentence).into_iter().map(|t| t.text).collect())
            .collect();

        let Some((first_sentence, mut cursor)) = self.find_chapter_start(&sentence_words, cursor) else {
            debug!("No chapter start found in the first {} sentences", self.options.chapter_search_sentences);
            return SentenceRangeResult {
                ranges: Vec::new(),
                next_cursor: cursor,
            };
        };

        let mut ranges: Vec<SentenceRange> = Vec::new();
        for (id, words) in sentence_words.iter().enumerate().skip(first_sentence) {
            if words.is_empty() {
                continue;
            }
            cursor = self.normalize(cursor);
            let Some((file, start)) = self.locate(words, cursor) else {
                continue;
            };
            let end = self.sentence_end(words, file, start);
            ranges.push(self.files[file].range(id, start, end));
            cursor = TimelineCursor {
                file_index: file,
                word_index: end + 1,
            };
        }

        for i in 1..ranges.len() {
            let (left, right) = ranges.split_at_mut(i);
            let (prev, next) = (&mut left[i - 1], &right[0]);
            if prev.audiofile == next.audiofile && prev.id + 1 == next.id {
                prev.end = next.start.max(prev.start);
            }
        }

        SentenceRangeResult {
            ranges,
            next_cursor: cursor,
        }
    }

    /// Skip past exhausted files.
    fn normalize(&self, mut cursor: TimelineCursor) -> TimelineCursor {
        while cursor.file_index + 1 < self.files.len() && cursor.word_index >= self.files[cursor.file_index].words.len()
        {
            cursor.file_index += 1;
            cursor.word_index = 0;
        }
        cursor
    }

    fn find_chapter_start(
        &mut self,
        sentence_words: &[Vec<String>],
        cursor: TimelineCursor,
    ) -> Option<(usize, TimelineCursor)> {
        let cursor = self.normalize(cursor);

        for (index, words) in sentence_words
            .iter()
            .enumerate()
            .take(self.options.chapter_search_sentences)
        {
            if words.is_empty() {
                continue;
            }
            let needle = &words[..words.len().min(self.options.max_needle_words)];

            for file in cursor.file_index..self.files.len() {
                let from = if file == cursor.file_index { cursor.word_index } else { 0 };
                if let Some(start) = self.search(needle, file, from, None) {
                    debug!("Chapter starts at sentence {} (file {}, word {})", index, file, start);
                    return Some((
                        index,
                        TimelineCursor {
                            file_index: file,
                            word_index: start,
                        },
                    ));
                }
            }
        }

        None
    }

    fn needle<'w>(&self, words: &'w [String]) -> &'w [String] {
        if words.len() > self.options.max_needle_words {
            &words[..self.options.anchor_words]
        } else {
            words
        }
    }

    /// Find the sentence's first word in the window after `cursor`, falling
    /// back to the first window of the next file.
    fn locate(&mut self, words: &[String], cursor: TimelineCursor) -> Option<(usize, usize)> {
        if self.files.is_empty() {
            return None;
        }
        let needle = self.needle(words);
        let lookahead = Some(self.options.lookahead_words);
        let file = cursor.file_index;

        if let Some(start) = self.search(needle, file, cursor.word_index, lookahead) {
            return Some((file, start));
        }

        let reaches_end = cursor.word_index + self.options.lookahead_words >= self.files[file].words.len();
        if reaches_end && file + 1 < self.files.len() {
            if let Some(start) = self.search(needle, file + 1, 0, lookahead) {
                return Some((file + 1, start));
            }
        }

        None
    }

    /// Index of the last timeline word of a sentence that starts at `start`.
    fn sentence_end(&mut self, words: &[String], file: usize, start: usize) -> usize {
        let file_len = self.files[file].words.len();
        let len = words.len();

        if len <= self.options.max_needle_words {
            return (start + len - 1).min(file_len - 1);
        }

        let anchor = self.options.anchor_words;
        let tail = &words[len - anchor..];
        let from = start + anchor;
        let limit = (2 * len).saturating_sub(anchor);
        match self.search(tail, file, from, Some(limit)) {
            Some(tail_start) => (tail_start + anchor - 1).min(file_len - 1),
            None => (start + len - 1).min(file_len - 1),
        }
    }

    /// First index in `[from, from + limit)` of `file` where `needle` starts,
    /// by exact equality and then by sound.
    fn search(&mut self, needle: &[String], file: usize, from: usize, limit: Option<usize>) -> Option<usize> {
        let words = &self.files[file].words;
        if needle.is_empty() || from >= words.len() {
            return None;
        }
        let last_start = match limit {
            Some(limit) => (from + limit).min(words.len()),
            None => words.len(),
        };
        let window_end = (last_start + needle.len() - 1).min(words.len());
        let window = &words[from..window_end];

        let exact = (0..window.len().saturating_sub(needle.len() - 1))
            .find(|&i| window[i..i + needle.len()] == *needle);
        if let Some(i) = exact {
            return Some(from + i);
        }

        self.matcher.find_match_words(needle, window).map(|i| from + i)
    }
}

/// Locate `sentences` in `transcriptions` starting at `cursor`.
pub fn get_sentence_ranges(
    sentences: &[String],
    transcriptions: &[Transcription],
    cursor: TimelineCursor,
    language: Language,
    options: AlignmentOptions,
) -> SyncResult<SentenceRangeResult> {
    let mut aligner = Aligner::new(transcriptions, language, options)?;
    Ok(aligner.get_sentence_ranges(sentences, cursor))
}

/// Narrated time covered by `ranges`: per audio file, last end minus first
/// start, summed over files.
pub fn get_chapter_duration(ranges: &[SentenceRange]) -> f64 {
    let mut spans: Vec<(&str, f64, f64)> = Vec::new();
    for range in ranges {
        match spans.iter_mut().find(|(file, _, _)| *file == range.audiofile) {
            Some(span) => {
                span.1 = span.1.min(range.start);
                span.2 = span.2.max(range.end);
            }
            None => spans.push((&range.audiofile, range.start, range.end)),
        }
    }
    spans.iter().map(|(_, start, end)| end - start).sum()
}
