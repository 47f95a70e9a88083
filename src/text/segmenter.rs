//! # Sentence Segmenter
//!
//! Splits text into sentences. Every returned sentence is an exact, trimmed
//! substring of the input so that callers (the XHTML tagger in particular)
//! can find it again by byte offset.
//!
//! ## Sentence boundaries:
//! - A run of terminal punctuation (`.`, `!`, `?`, `…`), optionally followed by
//!   closing quotes or brackets, then whitespace or end of text.
//! - A hard line break.
//!
//! ## Not a boundary:
//! - A period after a known abbreviation ("Mr.", "e.g.") or a single capital
//!   initial ("J. R. R. Tolkien").
//! - Terminal punctuation followed by a lowercase word or a digit.

use super::Language;

const ENGLISH_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "mx", "dr", "prof", "st", "jr", "sr", "vs", "e.g", "i.e", "mt", "capt",
    "col", "gen", "lt", "sgt", "rev", "hon", "fig", "approx", "dept", "ft", "no", "vol", "ch",
];

const SPANISH_ABBREVIATIONS: &[&str] = &[
    "sr", "sra", "srta", "dr", "dra", "ud", "uds", "lic", "ing", "pág", "núm", "av", "gral",
];

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | '”' | '’' | ')' | ']' | '}' | '»')
}

fn abbreviations(language: Language) -> &'static [&'static str] {
    match language {
        Language::English => ENGLISH_ABBREVIATIONS,
        Language::Spanish => SPANISH_ABBREVIATIONS,
        Language::Generic => ENGLISH_ABBREVIATIONS,
    }
}

/// Split `text` into sentences.
pub fn segment(text: &str, language: Language) -> Vec<String> {
    sentence_spans(text, language)
        .into_iter()
        .map(|(start, end)| text[start..end].to_string())
        .collect()
}

/// Byte ranges of every sentence in `text`, in order, trimmed and non-empty.
pub fn sentence_spans(text: &str, language: Language) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c == '\n' {
            push_trimmed(text, start, offset, &mut spans);
            start = offset + c.len_utf8();
            i += 1;
            continue;
        }

        if is_terminal(c) {
            let mut j = i;
            while j < chars.len() && is_terminal(chars[j].1) {
                j += 1;
            }
            while j < chars.len() && is_closing(chars[j].1) {
                j += 1;
            }

            let at_end = j == chars.len();
            if at_end || chars[j].1.is_whitespace() {
                let end = if at_end { text.len() } else { chars[j].0 };
                if should_break(text, &chars, i, j, language) {
                    push_trimmed(text, start, end, &mut spans);
                    start = end;
                }
            }

            i = j;
            continue;
        }

        i += 1;
    }

    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let s = start + leading;
    spans.push((s, s + trimmed.len()));
}

/// Decide whether the terminal run `chars[run_start..run_end]` closes a sentence.
fn should_break(
    text: &str,
    chars: &[(usize, char)],
    run_start: usize,
    run_end: usize,
    language: Language,
) -> bool {
    let next = chars[run_end..]
        .iter()
        .map(|(_, c)| *c)
        .find(|c| !c.is_whitespace() || *c == '\n');

    if let Some(next) = next {
        if next.is_lowercase() || next.is_ascii_digit() {
            return false;
        }
    }

    let run: String = chars[run_start..run_end]
        .iter()
        .map(|(_, c)| *c)
        .filter(|c| is_terminal(*c))
        .collect();
    if run != "." {
        return true;
    }

    let before = &text[..chars[run_start].0];
    let token: String = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic() || *c == '.')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if token.is_empty() {
        return true;
    }

    let mut letters = token.chars();
    if let (Some(only), None) = (letters.next(), letters.next()) {
        if only.is_uppercase() {
            return false;
        }
    }

    let lowered = token.to_lowercase();
    !abbreviations(language).contains(&lowered.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_segmentation() {
        let sentences = segment("Call me Ishmael. Some years ago I went to sea! Why? Never mind.", Language::English);
        assert_eq!(
            sentences,
            vec!["Call me Ishmael.", "Some years ago I went to sea!", "Why?", "Never mind."]
        );
    }

    #[test]
    fn test_abbreviations_and_initials() {
        let sentences = segment(
            "Mr. Smith met Dr. Jones at 5 p.m. sharp. J. R. R. Tolkien was there.",
            Language::English,
        );
        assert_eq!(
            sentences,
            vec!["Mr. Smith met Dr. Jones at 5 p.m. sharp.", "J. R. R. Tolkien was there."]
        );
    }

    #[test]
    fn test_closing_quotes_stay_with_sentence() {
        let sentences = segment("“Stop!” she cried. He did.", Language::English);
        assert_eq!(sentences, vec!["“Stop!” she cried.", "He did."]);

        let sentences = segment("He said “Stop.” Then he left.", Language::English);
        assert_eq!(sentences, vec!["He said “Stop.”", "Then he left."]);
    }

    #[test]
    fn test_newlines_drop_empty_sentences() {
        let sentences = segment("\n\nFirst line\n\n\nSecond line.\n", Language::English);
        assert_eq!(sentences, vec!["First line", "Second line."]);
    }

    #[test]
    fn test_spans_are_exact_substrings() {
        let text = "  One.  Two?   Three…  ";
        let spans = sentence_spans(text, Language::English);
        let found: Vec<&str> = spans.iter().map(|(s, e)| &text[*s..*e]).collect();
        assert_eq!(found, vec!["One.", "Two?", "Three…"]);
    }

    #[test]
    fn test_segmentation_is_idempotent() {
        let text = "It was the best of times. It was the worst of times! Was it? Yes.";
        let first = segment(text, Language::English);
        let second = segment(text, Language::English);
        assert_eq!(first, second);

        let rejoined = first.join(" ");
        assert_eq!(segment(&rejoined, Language::English), first);
    }

    #[test]
    fn test_spanish_abbreviation() {
        let sentences = segment("La Sra. García llegó tarde. Nadie dijo nada.", Language::Spanish);
        assert_eq!(sentences, vec!["La Sra. García llegó tarde.", "Nadie dijo nada."]);
    }

    #[test]
    fn test_empty_input() {
        assert!(segment("", Language::English).is_empty());
        assert!(segment("   \n  ", Language::English).is_empty());
    }
}
