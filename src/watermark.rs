use std::collections::HashMap;

use crate::types::ItemId;

/// Highest content id seen per target. Never moves backward.
#[derive(Debug, Default, Clone)]
pub struct WatermarkMap {
    marks: HashMap<String, ItemId>,
}

impl WatermarkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(marks: HashMap<String, ItemId>) -> Self {
        Self { marks }
    }

    pub fn get(&self, target: &str) -> Option<&ItemId> {
        self.marks.get(target)
    }

    /// `true` if `id` is strictly above the target's watermark (or none is set).
    pub fn is_new(&self, target: &str, id: &ItemId) -> bool {
        self.marks.get(target).is_none_or(|mark| id > mark)
    }

    /// Raise the watermark to `id` if it is higher. Returns whether it moved.
    pub fn advance(&mut self, target: &str, id: &ItemId) -> bool {
        match self.marks.get_mut(target) {
            Some(mark) if *mark >= *id => false,
            Some(mark) => {
                *mark = id.clone();
                true
            }
            None => {
                self.marks.insert(target.to_string(), id.clone());
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ItemId {
        ItemId::parse(raw).unwrap()
    }

    #[test]
    fn unseen_target_accepts_anything() {
        let marks = WatermarkMap::new();
        assert!(marks.is_new("alice", &id("1")));
    }

    #[test]
    fn tracks_maximum_across_batches() {
        let mut marks = WatermarkMap::new();
        for raw in ["105", "103", "110"] {
            marks.advance("alice", &id(raw));
        }
        assert_eq!(marks.get("alice"), Some(&id("110")));

        // A later batch returning older items leaves it unchanged
        assert!(!marks.advance("alice", &id("99")));
        assert!(!marks.advance("alice", &id("110")));
        assert_eq!(marks.get("alice"), Some(&id("110")));

        assert!(!marks.is_new("alice", &id("110")));
        assert!(marks.is_new("alice", &id("111")));
    }

    #[test]
    fn numeric_ordering_across_digit_lengths() {
        let mut marks = WatermarkMap::new();
        marks.advance("alice", &id("999"));
        assert!(marks.is_new("alice", &id("1000")));
        assert!(marks.advance("alice", &id("1000")));
    }

    #[test]
    fn targets_are_independent() {
        let mut marks = WatermarkMap::new();
        marks.advance("alice", &id("50"));
        assert!(marks.is_new("bob", &id("1")));
        assert_eq!(marks.len(), 1);
    }
}
