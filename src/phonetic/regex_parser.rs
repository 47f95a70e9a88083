//! Parser for the small pattern language used by phonetic rule contexts.
//!
//! Supported: `^` and `$` anchors, literals, classes `[abc]` / `[^abc]` and
//! alternation groups `(ab|c)`. Anything else compiles the whole pattern with
//! the `regex` crate instead.

use crate::error::{SyncError, SyncResult};
use regex::Regex;

/// One position in a parsed pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Any of these literal alternatives (single chars for classes).
    AnyOf(Vec<Vec<char>>),
    /// Exactly one char not in this set.
    NoneOf(Vec<char>),
}

/// A parsed pattern.
///
/// With an empty `items` body an exact pattern (`^$`) matches only the empty
/// string, while a single anchor or no anchor matches everything.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub is_prefix: bool,
    pub is_suffix: bool,
    pub is_exact: bool,
    pub items: Vec<Item>,
    regex: Option<Regex>,
}

impl MatchSpec {
    pub fn is_match(&self, text: &str) -> bool {
        if let Some(regex) = &self.regex {
            return regex.is_match(text);
        }

        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if self.items.is_empty() {
            return !self.is_exact || len == 0;
        }

        if self.is_exact {
            end_positions(&self.items, &chars, 0).contains(&len)
        } else if self.is_prefix {
            !end_positions(&self.items, &chars, 0).is_empty()
        } else if self.is_suffix {
            (0..=len).any(|start| end_positions(&self.items, &chars, start).contains(&len))
        } else {
            (0..=len).any(|start| !end_positions(&self.items, &chars, start).is_empty())
        }
    }

    pub fn is_regex(&self) -> bool {
        self.regex.is_some()
    }
}

/// Every index at which `items` can finish when matched from `start`.
fn end_positions(items: &[Item], text: &[char], start: usize) -> Vec<usize> {
    let mut positions = vec![start];

    for item in items {
        let mut next = Vec::new();
        for &pos in &positions {
            match item {
                Item::AnyOf(alternatives) => {
                    for alt in alternatives {
                        if text[pos..].starts_with(alt) {
                            next.push(pos + alt.len());
                        }
                    }
                }
                Item::NoneOf(excluded) => {
                    if pos < text.len() && !excluded.contains(&text[pos]) {
                        next.push(pos + 1);
                    }
                }
            }
        }
        next.sort_unstable();
        next.dedup();
        if next.is_empty() {
            return next;
        }
        positions = next;
    }

    positions
}

/// Parse a rule pattern into a [`MatchSpec`].
pub fn parse(pattern: &str) -> SyncResult<MatchSpec> {
    let is_start = pattern.starts_with('^');
    let body = if is_start { &pattern[1..] } else { pattern };
    let is_end = body.ends_with('$') && !body.ends_with("\\$");
    let body = if is_end { &body[..body.len() - 1] } else { body };

    let (is_exact, is_prefix, is_suffix) = match (is_start, is_end) {
        (true, true) => (true, false, false),
        (true, false) => (false, true, false),
        (false, true) => (false, false, true),
        (false, false) => (false, false, false),
    };

    match parse_items(body) {
        Some(items) => Ok(MatchSpec {
            is_prefix,
            is_suffix,
            is_exact,
            items,
            regex: None,
        }),
        None => {
            let regex = Regex::new(pattern)
                .map_err(|e| SyncError::Rules(format!("invalid pattern {:?}: {}", pattern, e)))?;
            Ok(MatchSpec {
                is_prefix,
                is_suffix,
                is_exact,
                items: Vec::new(),
                regex: Some(regex),
            })
        }
    }
}

/// `None` when the body uses syntax outside the supported subset.
fn parse_items(body: &str) -> Option<Vec<Item>> {
    let chars: Vec<char> = body.chars().collect();
    let mut items = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '[' => {
                let close = chars[i + 1..].iter().position(|&c| c == ']')? + i + 1;
                let class = &chars[i + 1..close];
                if class.is_empty() || class.iter().any(|c| "[(\\-".contains(*c)) {
                    return None;
                }
                if class[0] == '^' {
                    items.push(Item::NoneOf(class[1..].to_vec()));
                } else {
                    items.push(Item::AnyOf(class.iter().map(|c| vec![*c]).collect()));
                }
                i = close + 1;
            }
            '(' => {
                let close = chars[i + 1..].iter().position(|&c| c == ')')? + i + 1;
                let group: String = chars[i + 1..close].iter().collect();
                if group.chars().any(|c| "[(^$\\.*+?{".contains(c)) {
                    return None;
                }
                items.push(Item::AnyOf(group.split('|').map(|alt| alt.chars().collect()).collect()));
                i = close + 1;
            }
            c if "^$.*+?{}\\|)]".contains(c) => return None,
            c => {
                items.push(Item::AnyOf(vec![vec![c]]));
                i += 1;
            }
        }
    }

    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_flags() {
        let spec = parse("^ab$").unwrap();
        assert!(spec.is_exact && !spec.is_prefix && !spec.is_suffix);
        let spec = parse("^ab").unwrap();
        assert!(spec.is_prefix);
        let spec = parse("ab$").unwrap();
        assert!(spec.is_suffix);
        assert_eq!(spec.items.len(), 2);
    }

    #[test]
    fn test_empty_body() {
        let exact = parse("^$").unwrap();
        assert!(exact.is_match(""));
        assert!(!exact.is_match("a"));

        assert!(parse("$").unwrap().is_match("anything"));
        assert!(parse("^").unwrap().is_match("anything"));
        assert!(parse("").unwrap().is_match(""));
    }

    #[test]
    fn test_classes_and_groups() {
        let spec = parse("^[aeiou]").unwrap();
        assert!(spec.is_match("east"));
        assert!(!spec.is_match("west"));

        let spec = parse("[^aeiou]$").unwrap();
        assert!(spec.is_match("cat"));
        assert!(!spec.is_match("tea"));
        assert!(!spec.is_match(""));

        let spec = parse("^(ch|sh)a").unwrap();
        assert!(spec.is_match("chat"));
        assert!(spec.is_match("shake"));
        assert!(!spec.is_match("cat"));

        let spec = parse("(ph|f)$").unwrap();
        assert!(spec.is_match("graph"));
        assert!(spec.is_match("leaf"));
    }

    #[test]
    fn test_contains() {
        let spec = parse("ou").unwrap();
        assert!(spec.is_match("house"));
        assert!(!spec.is_match("horse"));
    }

    #[test]
    fn test_unsupported_syntax_falls_back_to_regex() {
        let spec = parse("^a.+b$").unwrap();
        assert!(spec.is_regex());
        assert!(spec.is_match("axxb"));
        assert!(!spec.is_match("ab"));
    }

    #[test]
    fn test_invalid_regex_is_a_rules_error() {
        assert!(matches!(parse("a(+"), Err(SyncError::Rules(_))));
    }
}
