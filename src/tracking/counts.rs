//! Typed bounded counter maps
//!
//! Daily aggregate rows persist breakdowns as string-keyed numeric maps
//! with a reserved `other` accumulator. In memory they are an explicit
//! ordered (key, count) structure rather than an ambient-growth hash map:
//! the key cap is enforced by the store's conditional updates on the write
//! side, while this type carries the decoded rows and the read-side folds.

use std::collections::BTreeMap;

/// Reserved catch-all key. Exempt from every cap, never evicted.
pub const OVERFLOW_KEY: &str = "other";

/// An ordered set of (key, count) pairs plus the dedicated overflow
/// accumulator. Real keys are kept sorted and never include
/// [`OVERFLOW_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedCounts {
    entries: Vec<(String, u64)>,
    other: u64,
}

impl BoundedCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a decoded storage map, routing the reserved key into the
    /// overflow accumulator.
    pub fn from_map(map: BTreeMap<String, u64>) -> Self {
        let mut counts = Self::new();
        for (key, count) in map {
            counts.add(&key, count);
        }
        counts
    }

    /// Parse a stored JSON object column (`'{}'` when the row is fresh).
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let map: BTreeMap<String, u64> = serde_json::from_str(raw)?;
        Ok(Self::from_map(map))
    }

    /// Add `count` to `key`, creating the entry when absent. `other` routes
    /// to the overflow accumulator. Read-side folds merge whole days with
    /// this, so it applies no cap of its own.
    pub fn add(&mut self, key: &str, count: u64) {
        if count == 0 {
            return;
        }
        if key == OVERFLOW_KEY {
            self.other += count;
            return;
        }
        match self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(idx) => self.entries[idx].1 += count,
            Err(idx) => self.entries.insert(idx, (key.to_string(), count)),
        }
    }

    /// Fold another map into this one, entry by entry.
    pub fn merge(&mut self, rhs: &BoundedCounts) {
        for (key, count) in &rhs.entries {
            self.add(key, *count);
        }
        self.other += rhs.other;
    }

    pub fn get(&self, key: &str) -> u64 {
        if key == OVERFLOW_KEY {
            return self.other;
        }
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .map(|idx| self.entries[idx].1)
            .unwrap_or(0)
    }

    /// Number of real (non-overflow) keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Count absorbed by the overflow accumulator.
    pub fn other(&self) -> u64 {
        self.other
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.other == 0
    }

    /// Sum of every count, overflow included.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| c).sum::<u64>() + self.other
    }

    /// Real entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), *c))
    }

    /// Top `n` real entries by count (descending), key order breaking ties.
    /// The overflow accumulator is reported separately by callers.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(n);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map_separates_overflow() {
        let mut map = BTreeMap::new();
        map.insert("fb".to_string(), 3);
        map.insert("other".to_string(), 7);
        map.insert("ig".to_string(), 1);

        let counts = BoundedCounts::from_map(map);
        assert_eq!(counts.key_count(), 2);
        assert_eq!(counts.other(), 7);
        assert_eq!(counts.get("fb"), 3);
        assert_eq!(counts.get("other"), 7);
        assert_eq!(counts.total(), 11);
    }

    #[test]
    fn test_from_json_empty_object() {
        let counts = BoundedCounts::from_json("{}").unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_add_and_merge() {
        let mut a = BoundedCounts::new();
        a.add("x", 2);
        a.add("y", 1);
        a.add("other", 4);

        let mut b = BoundedCounts::new();
        b.add("y", 5);
        b.add("z", 1);
        b.add("other", 1);

        a.merge(&b);
        assert_eq!(a.get("x"), 2);
        assert_eq!(a.get("y"), 6);
        assert_eq!(a.get("z"), 1);
        assert_eq!(a.other(), 5);
        assert_eq!(a.key_count(), 3);
    }

    #[test]
    fn test_zero_add_is_noop() {
        let mut counts = BoundedCounts::new();
        counts.add("x", 0);
        assert!(counts.is_empty());
    }

    #[test]
    fn test_top_orders_by_count_then_key() {
        let mut counts = BoundedCounts::new();
        counts.add("c", 2);
        counts.add("a", 5);
        counts.add("b", 2);
        counts.add("other", 100);

        let top = counts.top(2);
        assert_eq!(
            top,
            vec![("a".to_string(), 5), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn test_entries_stay_sorted_by_key() {
        let mut counts = BoundedCounts::new();
        for key in ["m", "a", "z", "k"] {
            counts.add(key, 1);
        }
        let keys: Vec<&str> = counts.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "k", "m", "z"]);
    }
}
