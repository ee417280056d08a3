use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Content id as compared by the watermark.
///
/// Ids made only of ASCII digits are compared by numeric magnitude, so `"999"`
/// sorts before `"1000"`. Anything else is compared lexicographically. Every
/// numeric id sorts before every opaque one, which keeps the order total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ItemId {
    Numeric(u128),
    Opaque(String),
}

impl ItemId {
    pub fn parse(raw: &str) -> Result<Self, ExtractionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ExtractionError::MissingId);
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<u128>() {
                return Ok(ItemId::Numeric(n));
            }
        }
        Ok(ItemId::Opaque(raw.to_string()))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ItemId::Numeric(a), ItemId::Numeric(b)) => a.cmp(b),
            (ItemId::Opaque(a), ItemId::Opaque(b)) => a.cmp(b),
            (ItemId::Numeric(_), ItemId::Opaque(_)) => Ordering::Less,
            (ItemId::Opaque(_), ItemId::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Numeric(n) => write!(f, "{n}"),
            ItemId::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ItemId {
    type Error = ExtractionError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        ItemId::parse(&raw)
    }
}

/// One post fetched from a watched account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Raw id as returned by the fetcher; parsed with [`ItemId::parse`].
    pub id: String,
    /// `None` when the fetcher could not read the post body.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_repost: bool,
    /// Filled in by the fetcher from the requested target.
    #[serde(default)]
    pub target: String,
}

impl ContentItem {
    pub fn item_id(&self) -> Result<ItemId, ExtractionError> {
        ItemId::parse(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ContractAddress,
    KeywordMatch,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::ContractAddress => "contract_address",
            SignalKind::KeywordMatch => "keyword_match",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of interest extracted from one content item.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal<'a> {
    pub kind: SignalKind,
    /// The address or keyword exactly as matched.
    pub value: String,
    pub source: &'a ContentItem,
}

impl Signal<'_> {
    /// Case-folded value with whitespace runs collapsed to one space.
    pub fn normalized(&self) -> String {
        normalize(&self.value)
    }

    /// Identity used by the dedup ledger.
    ///
    /// Addresses dedup on their value alone. A keyword is not a unique entity,
    /// so keyword matches dedup per source item.
    pub fn ledger_key(&self) -> String {
        match self.kind {
            SignalKind::ContractAddress => format!("ca:{}", self.normalized()),
            SignalKind::KeywordMatch => format!(
                "kw:{}:{}:{}",
                self.normalized(),
                normalize(&self.source.target),
                self.source.id.trim()
            ),
        }
    }

    /// Build the downstream payload for this signal.
    pub fn to_event(&self, discovered_at: DateTime<Utc>) -> SignalEvent {
        SignalEvent {
            value: self.value.clone(),
            kind: self.kind,
            target: self.source.target.clone(),
            permalink: self.source.permalink.clone(),
            source_timestamp: self.source.published_at,
            discovered_at,
        }
    }
}

pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Payload handed to the downstream publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub value: String,
    pub kind: SignalKind,
    pub target: String,
    pub permalink: String,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

/// Archived record of one item that produced at least one new signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub detected_at: DateTime<Utc>,
    pub target: String,
    pub item_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub text: String,
    pub permalink: String,
    pub addresses: Vec<String>,
    pub keywords: Vec<String>,
}

impl AlertRecord {
    /// Build the record for `item` from the signals that were new for it.
    pub fn from_signals(item: &ContentItem, signals: &[&Signal<'_>], detected_at: DateTime<Utc>) -> Self {
        let values = |kind: SignalKind| -> Vec<String> {
            signals
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| s.value.clone())
                .collect()
        };
        Self {
            detected_at,
            target: item.target.clone(),
            item_id: item.id.clone(),
            published_at: item.published_at,
            text: item.text.clone().unwrap_or_default(),
            permalink: item.permalink.clone(),
            addresses: values(SignalKind::ContractAddress),
            keywords: values(SignalKind::KeywordMatch),
        }
    }
}

/// Counters reported when the monitor shuts down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub targets_polled: u64,
    pub targets_failed: u64,
    pub auth_failures: u64,
    pub items_processed: u64,
    pub items_skipped: u64,
    pub signals_published: u64,
    pub signals_suppressed: u64,
    pub publish_failures: u64,
    pub seen_signals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, target: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            text: Some(String::new()),
            permalink: format!("https://x.com/{target}/status/{id}"),
            published_at: None,
            is_repost: false,
            target: target.to_string(),
        }
    }

    // ── ItemId ─────────────────────────────────────────────────────

    #[test]
    fn numeric_ids_compare_by_magnitude() {
        let short = ItemId::parse("999").unwrap();
        let long = ItemId::parse("1000").unwrap();
        assert!(short < long);
        // Lexicographic order would say the opposite
        assert!("999" > "1000");
    }

    #[test]
    fn opaque_ids_compare_lexicographically() {
        let a = ItemId::parse("abc").unwrap();
        let b = ItemId::parse("abd").unwrap();
        assert!(a < b);
        assert!(ItemId::parse("12").unwrap() < a);
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(matches!(ItemId::parse("  "), Err(ExtractionError::MissingId)));
    }

    #[test]
    fn id_serializes_as_string() {
        let id = ItemId::parse("1861234567890123456").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1861234567890123456\"");
        let back: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    // ── Signal ─────────────────────────────────────────────────────

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize("  To The\t Moon "), "to the moon");
    }

    #[test]
    fn address_key_ignores_source() {
        let a = item("1", "alice");
        let b = item("2", "bob");
        let s1 = Signal { kind: SignalKind::ContractAddress, value: "Abc".into(), source: &a };
        let s2 = Signal { kind: SignalKind::ContractAddress, value: " abc ".into(), source: &b };
        assert_eq!(s1.ledger_key(), s2.ledger_key());
    }

    #[test]
    fn keyword_key_is_per_item() {
        let a = item("1", "alice");
        let b = item("2", "alice");
        let s1 = Signal { kind: SignalKind::KeywordMatch, value: "pump".into(), source: &a };
        let s2 = Signal { kind: SignalKind::KeywordMatch, value: "PUMP".into(), source: &b };
        assert_ne!(s1.ledger_key(), s2.ledger_key());
    }

    #[test]
    fn event_carries_source_fields() {
        let mut src = item("7", "alice");
        let published = Utc::now();
        src.published_at = Some(published);
        let s = Signal { kind: SignalKind::ContractAddress, value: "X".into(), source: &src };
        let now = Utc::now();
        let ev = s.to_event(now);
        assert_eq!(ev.target, "alice");
        assert_eq!(ev.source_timestamp, Some(published));
        assert_eq!(ev.discovered_at, now);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "contract_address");
    }

    // ── AlertRecord ────────────────────────────────────────────────

    #[test]
    fn alert_splits_signals_by_kind() {
        let mut src = item("9", "alice");
        src.text = Some("moon ABC".into());
        let addr = Signal { kind: SignalKind::ContractAddress, value: "ABC".into(), source: &src };
        let kw = Signal { kind: SignalKind::KeywordMatch, value: "moon".into(), source: &src };
        let alert = AlertRecord::from_signals(&src, &[&addr, &kw], Utc::now());
        assert_eq!(alert.addresses, vec!["ABC"]);
        assert_eq!(alert.keywords, vec!["moon"]);
        assert_eq!(alert.item_id, "9");
        assert_eq!(alert.text, "moon ABC");
    }
}
