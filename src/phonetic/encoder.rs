//! Word → phonetic code set.
//!
//! A word runs through three rule passes (language main, shared final,
//! language final). Rules with several outputs fork the candidate; every
//! surviving fork contributes one code.

use super::rules::{PhoneticOutput, RuleIndex, RuleSet, Stage};
use crate::text::Language;
use std::collections::BTreeSet;

/// Upper bound on candidates carried through one word.
const MAX_FORKS: usize = 64;

/// Multi-word surname prefixes glued onto the following word.
const MULTI_WORD_PREFIXES: &[&str] = &["van der", "van den", "von der", "de la", "de los", "de las", "della"];

/// Leading words that are not encoded on their own in two-word input.
const DISCARDED_PREFIXES: &[&str] = &["de", "da", "di", "del", "la", "le", "van", "von", "d", "l", "st", "dos", "das"];

/// A candidate code under construction.
#[derive(Debug, Clone)]
struct Fork {
    text: String,
    mask: u32,
}

fn normalize(word: &str) -> String {
    let mut word = word.trim().to_lowercase();

    for prefix in MULTI_WORD_PREFIXES {
        if let Some(rest) = word.strip_prefix(&format!("{} ", prefix)) {
            word = format!("{}{}", prefix.replace(' ', ""), rest);
            break;
        }
    }

    word.retain(|c| c != '\'' && c != '’');
    word.replacen('-', " ", 1)
}

/// Encode a word into its set of phonetic codes.
pub fn encode_with(index: &RuleIndex, word: &str, language: Language) -> BTreeSet<String> {
    let word = normalize(word);

    if let Some((first, second)) = word.split_once(' ') {
        let (first, second) = (first.trim(), second.trim());
        if !first.is_empty() && !second.is_empty() && !second.contains(' ') {
            let mut codes = encode_with(index, second, language);
            codes.extend(encode_with(index, &format!("{}{}", first, second), language));
            if !DISCARDED_PREFIXES.contains(&first) {
                codes.extend(encode_with(index, first, language));
            }
            return codes;
        }
    }

    let mut forks = vec![Fork {
        text: word,
        mask: language.mask(),
    }];

    for stage in [Stage::Main, Stage::Final1, Stage::Final2] {
        let Some(rules) = index.rules(language, stage) else {
            continue;
        };
        let ignore_masks = stage == Stage::Final2;
        let mut next = Vec::new();
        for fork in &forks {
            for produced in apply_pass(&fork.text, fork.mask, rules, ignore_masks) {
                if next.len() < MAX_FORKS {
                    next.push(produced);
                }
            }
        }
        forks = next;
    }

    forks.into_iter().map(|fork| fork.text).collect()
}

/// One left-to-right scan of `input` with `rules`.
fn apply_pass(input: &str, mask: u32, rules: &RuleSet, ignore_masks: bool) -> Vec<Fork> {
    let chars: Vec<char> = input.chars().collect();
    let mut forks = vec![Fork {
        text: String::with_capacity(input.len()),
        mask,
    }];
    let mut pos = 0;

    while pos < chars.len() {
        match rules.find(&chars, pos) {
            Some((rule, len)) => {
                forks = branch(forks, &rule.outputs, ignore_masks);
                pos += len;
            }
            None => {
                for fork in &mut forks {
                    fork.text.push(chars[pos]);
                }
                pos += 1;
            }
        }
    }

    forks
}

/// Extend every fork with each compatible output. Single-output rules append
/// in place; a fork is only cloned when a rule really branches.
fn branch(forks: Vec<Fork>, outputs: &[PhoneticOutput], ignore_masks: bool) -> Vec<Fork> {
    let mut result: Vec<Fork> = Vec::with_capacity(forks.len());

    for mut fork in forks {
        let compatible: Vec<&PhoneticOutput> = outputs
            .iter()
            .filter(|output| ignore_masks || output.mask & fork.mask != 0)
            .collect();

        let chosen: Vec<(&PhoneticOutput, u32)> = if compatible.is_empty() {
            vec![(&outputs[0], fork.mask)]
        } else if ignore_masks {
            compatible.into_iter().map(|output| (output, fork.mask)).collect()
        } else {
            compatible
                .into_iter()
                .map(|output| (output, fork.mask & output.mask))
                .collect()
        };

        let (last, rest) = match chosen.split_last() {
            Some(split) => split,
            None => continue,
        };
        for (output, mask) in rest {
            if result.len() >= MAX_FORKS {
                break;
            }
            let mut copy = fork.clone();
            copy.text.push_str(&output.text);
            copy.mask = *mask;
            push_unique(&mut result, copy);
        }
        fork.text.push_str(&last.0.text);
        fork.mask = last.1;
        if result.len() < MAX_FORKS {
            push_unique(&mut result, fork);
        }
    }

    result
}

fn push_unique(forks: &mut Vec<Fork>, fork: Fork) {
    if !forks.iter().any(|f| f.text == fork.text && f.mask == fork.mask) {
        forks.push(fork);
    }
}
