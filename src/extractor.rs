use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ContentItem, Signal, SignalKind, normalize};

/// Base58-style token: no `0`, `O`, `I` or `l`, 32 to 44 characters, whole word only.
pub const ADDRESS_PATTERN: &str = r"\b[A-HJ-NP-Za-km-z1-9]{32,44}\b";

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ADDRESS_PATTERN).expect("address pattern is valid"));

/// Matchers applied to every content item.
#[derive(Debug, Clone)]
pub struct Patterns {
    address: Regex,
    /// `(as configured, lowercased)` pairs.
    keywords: Vec<(String, String)>,
}

impl Patterns {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            address: ADDRESS_RE.clone(),
            keywords: prepare_keywords(keywords),
        }
    }

    /// Use a custom address pattern instead of [`ADDRESS_PATTERN`].
    pub fn with_address_pattern(pattern: &str, keywords: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            address: Regex::new(pattern)?,
            keywords: prepare_keywords(keywords),
        })
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }
}

fn prepare_keywords(keywords: &[String]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(|k| (k.to_string(), k.to_lowercase()))
        .collect()
}

/// Extract every signal from one item. Pure: same input, same output.
///
/// Addresses come first in order of appearance, repeated addresses collapsed;
/// keyword matches follow in configuration order. An item whose text could
/// not be read yields nothing.
pub fn extract<'a>(item: &'a ContentItem, patterns: &Patterns) -> Vec<Signal<'a>> {
    let Some(text) = item.text.as_deref() else {
        return Vec::new();
    };

    let mut signals = Vec::new();
    let mut seen = HashSet::new();

    for m in patterns.address.find_iter(text) {
        let value = m.as_str();
        if seen.insert(normalize(value)) {
            signals.push(Signal {
                kind: SignalKind::ContractAddress,
                value: value.to_string(),
                source: item,
            });
        }
    }

    let lowered = text.to_lowercase();
    for (keyword, needle) in &patterns.keywords {
        if lowered.contains(needle.as_str()) {
            signals.push(Signal {
                kind: SignalKind::KeywordMatch,
                value: keyword.clone(),
                source: item,
            });
        }
    }

    signals
}
