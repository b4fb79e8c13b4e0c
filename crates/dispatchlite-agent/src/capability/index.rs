//! Keyword index: token → registered capabilities.
//!
//! Used only to narrow the set of capabilities the rule-based selector scores. A
//! request that matches no token falls back to every registered capability.

use std::collections::{BTreeSet, HashMap};

/// Description words at or below this length are not indexed.
const MIN_DESCRIPTION_WORD_LEN: usize = 4;

/// Split on anything that is not alphanumeric and lower-case the pieces.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Name parts: the lower-cased name split on separators (`_`, `-`, `.`, spaces, ...).
pub fn name_parts(name: &str) -> Vec<String> {
    tokenize(name)
}

/// Description words long enough to be indexed.
pub fn description_words(description: &str) -> Vec<String> {
    tokenize(description)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_DESCRIPTION_WORD_LEN)
        .collect()
}

/// Inverted index from token to registry positions.
#[derive(Debug, Default, Clone)]
pub struct CapabilityIndex {
    tokens: HashMap<String, BTreeSet<usize>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one capability at registry position `position`.
    pub fn add(&mut self, position: usize, name: &str, description: &str) {
        let lowered = name.to_lowercase();
        self.tokens.entry(lowered).or_default().insert(position);
        for part in name_parts(name) {
            self.tokens.entry(part).or_default().insert(position);
        }
        for word in description_words(description) {
            self.tokens.entry(word).or_default().insert(position);
        }
    }

    /// Rebuild from scratch (used when an entry is replaced in place).
    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = (usize, &'a str, &'a str)>) {
        self.tokens.clear();
        for (position, name, description) in entries {
            self.add(position, name, description);
        }
    }

    /// Registry positions whose tokens appear in `request`, in registration order.
    /// Empty when nothing matches; the caller decides the fallback.
    pub fn lookup(&self, request: &str) -> Vec<usize> {
        let mut hits = BTreeSet::new();
        for token in tokenize(request) {
            if let Some(positions) = self.tokens.get(&token) {
                hits.extend(positions.iter().copied());
            }
        }
        hits.into_iter().collect()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
