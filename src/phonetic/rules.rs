//! # Phonetic Rule Data
//!
//! Rules are declarative TOML embedded in the binary and indexed once per
//! process by language, stage and the first character of their pattern.
//!
//! ## Rule format:
//! ```toml
//! [[rule]]
//! pattern = "qu"
//! right = "[aeiouy]"      # optional, matched against the text after
//! left = "^"              # optional, matched against the text before
//! outputs = ["kv", "k[1]"] # alternatives, optional `[mask]` suffix
//! ```

use crate::error::{SyncError, SyncResult};
use crate::phonetic::regex_parser::{self, MatchSpec};
use crate::text::Language;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

const ENGLISH_MAIN: &str = include_str!("rules/english_main.toml");
const SPANISH_MAIN: &str = include_str!("rules/spanish_main.toml");
const GENERIC_MAIN: &str = include_str!("rules/generic_main.toml");
const FINAL1: &str = include_str!("rules/final1.toml");
const ENGLISH_FINAL2: &str = include_str!("rules/english_final2.toml");
const SPANISH_FINAL2: &str = include_str!("rules/spanish_final2.toml");
const GENERIC_FINAL2: &str = include_str!("rules/generic_final2.toml");

/// Rule passes, applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Main,
    Final1,
    Final2,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default)]
    left: String,
    #[serde(default)]
    right: String,
    outputs: Vec<String>,
}

/// One alternative replacement text and the languages it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneticOutput {
    pub text: String,
    pub mask: u32,
}

impl PhoneticOutput {
    /// Parse `"text"` or `"text[mask]"`.
    fn parse(raw: &str) -> SyncResult<Self> {
        if let (Some(open), true) = (raw.rfind('['), raw.ends_with(']')) {
            let mask = raw[open + 1..raw.len() - 1]
                .parse::<u32>()
                .map_err(|_| SyncError::Rules(format!("bad language mask in output {:?}", raw)))?;
            return Ok(Self {
                text: raw[..open].to_string(),
                mask,
            });
        }
        Ok(Self {
            text: raw.to_string(),
            mask: u32::MAX,
        })
    }
}

/// A context-sensitive rewrite rule.
#[derive(Debug, Clone)]
pub struct PhoneticRule {
    pub pattern: Vec<char>,
    left: MatchSpec,
    right: MatchSpec,
    pub outputs: Vec<PhoneticOutput>,
}

impl PhoneticRule {
    fn from_raw(raw: RawRule) -> SyncResult<Self> {
        if raw.pattern.is_empty() {
            return Err(SyncError::Rules("rule with empty pattern".to_string()));
        }
        if raw.outputs.is_empty() {
            return Err(SyncError::Rules(format!("rule {:?} has no outputs", raw.pattern)));
        }

        Ok(Self {
            pattern: raw.pattern.chars().collect(),
            left: regex_parser::parse(&format!("{}$", raw.left))?,
            right: regex_parser::parse(&format!("^{}", raw.right))?,
            outputs: raw
                .outputs
                .iter()
                .map(|output| PhoneticOutput::parse(output))
                .collect::<SyncResult<Vec<_>>>()?,
        })
    }

    /// Length of the match at `pos`, if the pattern and both contexts hold.
    pub fn matches_at(&self, chars: &[char], pos: usize) -> Option<usize> {
        if !chars[pos..].starts_with(&self.pattern) {
            return None;
        }
        let end = pos + self.pattern.len();
        let before: String = chars[..pos].iter().collect();
        let after: String = chars[end..].iter().collect();
        if self.left.is_match(&before) && self.right.is_match(&after) {
            Some(self.pattern.len())
        } else {
            None
        }
    }
}

/// The rules of one pass, bucketed by first pattern character.
#[derive(Debug, Default)]
pub struct RuleSet {
    by_first: HashMap<char, Vec<PhoneticRule>>,
    len: usize,
}

impl RuleSet {
    fn parse(source: &str) -> SyncResult<Self> {
        let file: RuleFile = toml::from_str(source)?;
        let mut set = RuleSet::default();
        for raw in file.rule {
            let rule = PhoneticRule::from_raw(raw)?;
            set.by_first.entry(rule.pattern[0]).or_default().push(rule);
            set.len += 1;
        }
        Ok(set)
    }

    /// First rule that applies at `pos`, with the length it consumes.
    pub fn find(&self, chars: &[char], pos: usize) -> Option<(&PhoneticRule, usize)> {
        self.by_first
            .get(&chars[pos])?
            .iter()
            .find_map(|rule| rule.matches_at(chars, pos).map(|len| (rule, len)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// All rule sets, keyed by language and stage.
#[derive(Debug)]
pub struct RuleIndex {
    sets: HashMap<(Language, Stage), RuleSet>,
    final1: RuleSet,
}

impl RuleIndex {
    /// Build the index from the embedded rule files.
    pub fn load() -> SyncResult<Self> {
        let mut sets = HashMap::new();
        for (language, main, final2) in [
            (Language::English, ENGLISH_MAIN, ENGLISH_FINAL2),
            (Language::Spanish, SPANISH_MAIN, SPANISH_FINAL2),
            (Language::Generic, GENERIC_MAIN, GENERIC_FINAL2),
        ] {
            sets.insert((language, Stage::Main), RuleSet::parse(main)?);
            sets.insert((language, Stage::Final2), RuleSet::parse(final2)?);
        }
        let final1 = RuleSet::parse(FINAL1)?;

        debug!(
            "Loaded phonetic rules: {} rule sets, {} shared final rules",
            sets.len(),
            final1.len()
        );
        Ok(Self { sets, final1 })
    }

    /// Rules for a pass. The first final stage is shared by all languages.
    pub fn rules(&self, language: Language, stage: Stage) -> Option<&RuleSet> {
        match stage {
            Stage::Final1 => Some(&self.final1),
            _ => self.sets.get(&(language, stage)),
        }
    }
}

static RULES: Lazy<Result<RuleIndex, String>> = Lazy::new(|| RuleIndex::load().map_err(|e| e.to_string()));

/// The process-wide rule index, built on first use.
pub fn global() -> SyncResult<&'static RuleIndex> {
    RULES.as_ref().map_err(|e| SyncError::Rules(e.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_rules_load() {
        let index = global().unwrap();
        for language in [Language::English, Language::Spanish, Language::Generic] {
            assert!(!index.rules(language, Stage::Main).unwrap().is_empty());
            assert!(!index.rules(language, Stage::Final2).unwrap().is_empty());
        }
        assert!(!index.rules(Language::English, Stage::Final1).unwrap().is_empty());
    }

    #[test]
    fn test_output_masks() {
        assert_eq!(
            PhoneticOutput::parse("kv[1]").unwrap(),
            PhoneticOutput { text: "kv".to_string(), mask: 1 }
        );
        assert_eq!(PhoneticOutput::parse("[2]").unwrap().text, "");
        assert_eq!(PhoneticOutput::parse("s").unwrap().mask, u32::MAX);
        assert!(PhoneticOutput::parse("s[x]").is_err());
    }

    #[test]
    fn test_contexts_gate_rules() {
        let set = RuleSet::parse(
            r#"
[[rule]]
pattern = "kn"
left = "^"
outputs = ["n"]

[[rule]]
pattern = "c"
right = "[eiy]"
outputs = ["s"]

[[rule]]
pattern = "c"
outputs = ["k"]
"#,
        )
        .unwrap();

        let knee: Vec<char> = "knee".chars().collect();
        assert_eq!(set.find(&knee, 0).map(|(r, len)| (r.outputs[0].text.as_str(), len)), Some(("n", 2)));

        let acne: Vec<char> = "akne".chars().collect();
        assert!(set.find(&acne, 1).is_none());

        let city: Vec<char> = "city".chars().collect();
        assert_eq!(set.find(&city, 0).unwrap().0.outputs[0].text, "s");
        let cat: Vec<char> = "cat".chars().collect();
        assert_eq!(set.find(&cat, 0).unwrap().0.outputs[0].text, "k");
    }

    #[test]
    fn test_bad_rule_file_is_rules_error() {
        assert!(matches!(RuleSet::parse("[[rule]]\npattern = \"a\"\noutputs = []\n"), Err(SyncError::Rules(_))));
        assert!(matches!(RuleSet::parse("not toml ["), Err(SyncError::Rules(_))));
    }
}
