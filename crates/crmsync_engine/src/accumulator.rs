//! Cross-record change accumulation with per-attribute last-writer-wins.

use crmsync_store::{Attributes, Timestamp};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Changesets for one logical record, keyed by the time they were made.
///
/// The resolved attribute set depends only on the set of stored
/// `(timestamp, changeset)` pairs: insertion order and duplicates do not
/// matter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    changesets: BTreeMap<Timestamp, Attributes>,
}

impl Accumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a changeset, merging it with any changeset at the same time.
    ///
    /// When two changesets at one timestamp disagree on an attribute, the
    /// value with the greater JSON rendering is kept.
    pub fn store(&mut self, timestamp: Timestamp, changeset: Attributes) {
        let existing = self.changesets.entry(timestamp).or_default();
        for (attribute, value) in changeset {
            match existing.entry(attribute) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(mut slot) => {
                    if prevails(&value, slot.get()) {
                        slot.insert(value);
                    }
                }
            }
        }
    }

    /// Resolves every attribute to its most recently written value.
    pub fn attributes(&self) -> Attributes {
        let mut resolved = Attributes::new();
        for changeset in self.changesets.values() {
            resolved.extend(changeset.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        resolved
    }

    /// Resolved values for the attributes present in `comparison`.
    pub fn current(&self, comparison: &Attributes) -> Attributes {
        let mut resolved = self.attributes();
        resolved.retain(|attribute, _| comparison.contains_key(attribute));
        resolved
    }

    /// Resolved values that differ from `comparison`.
    ///
    /// Empty when writing the resolved state to `comparison` would change
    /// nothing.
    pub fn diff(&self, comparison: &Attributes) -> Attributes {
        let mut resolved = self.current(comparison);
        resolved.retain(|attribute, value| comparison.get(attribute) != Some(value));
        resolved
    }

    /// Time of the newest stored changeset.
    pub fn newest(&self) -> Option<Timestamp> {
        self.changesets.keys().next_back().copied()
    }

    /// Returns true if a change at least as new as `timestamp` was stored,
    /// so a record last written at `timestamp` is fully reflected.
    pub fn up_to_date_for(&self, timestamp: Timestamp) -> bool {
        self.newest().is_some_and(|newest| newest >= timestamp)
    }

    /// Number of distinct timestamps.
    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    /// Returns true if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }
}

fn prevails(candidate: &Value, current: &Value) -> bool {
    candidate.to_string() > current.to_string()
}

/// Key of one logical record across both stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeKey {
    /// Remote id of the record.
    pub remote_id: String,
    /// Remote object type.
    pub remote_type: String,
}

impl ChangeKey {
    /// Creates a key.
    pub fn new(remote_id: impl Into<String>, remote_type: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            remote_type: remote_type.into(),
        }
    }
}

/// Accumulators for every record changed in a cycle, across all mappings.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedChanges {
    entries: HashMap<ChangeKey, Accumulator>,
}

impl AccumulatedChanges {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a changeset for `key`.
    pub fn store(&mut self, key: ChangeKey, timestamp: Timestamp, changeset: Attributes) {
        self.entries.entry(key).or_default().store(timestamp, changeset);
    }

    /// Returns the accumulator for `key`.
    pub fn get(&self, key: &ChangeKey) -> Option<&Accumulator> {
        self.entries.get(key)
    }

    /// Iterates over the entries of one remote type, in key order.
    pub fn for_remote_type<'a>(
        &'a self,
        remote_type: &'a str,
    ) -> impl Iterator<Item = (&'a ChangeKey, &'a Accumulator)> + 'a {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(move |(key, _)| key.remote_type == remote_type)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    /// Number of records with changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn newer_changes_win_per_attribute() {
        let mut accumulator = Accumulator::new();
        accumulator.store(at(2), attrs(json!({ "name": "New" })));
        accumulator.store(at(1), attrs(json!({ "name": "Old", "email": "a@b" })));

        assert_eq!(
            accumulator.attributes(),
            attrs(json!({ "name": "New", "email": "a@b" }))
        );
    }

    #[test]
    fn same_timestamp_changesets_merge() {
        let mut accumulator = Accumulator::new();
        accumulator.store(at(1), attrs(json!({ "name": "A" })));
        accumulator.store(at(1), attrs(json!({ "email": "x" })));

        assert_eq!(accumulator.len(), 1);
        assert_eq!(
            accumulator.attributes(),
            attrs(json!({ "name": "A", "email": "x" }))
        );
    }

    #[test]
    fn current_and_diff() {
        let mut accumulator = Accumulator::new();
        accumulator.store(at(1), attrs(json!({ "name": "A", "email": "x", "age": 3 })));

        let comparison = attrs(json!({ "name": "A", "email": "y" }));
        assert_eq!(
            accumulator.current(&comparison),
            attrs(json!({ "name": "A", "email": "x" }))
        );
        assert_eq!(accumulator.diff(&comparison), attrs(json!({ "email": "x" })));
        assert!(accumulator
            .diff(&attrs(json!({ "name": "A", "email": "x" })))
            .is_empty());
    }

    #[test]
    fn up_to_date_tracks_newest() {
        let mut accumulator = Accumulator::new();
        assert!(!accumulator.up_to_date_for(at(1)));

        accumulator.store(at(5), Attributes::new());
        accumulator.store(at(3), Attributes::new());
        assert_eq!(accumulator.newest(), Some(at(5)));
        assert!(accumulator.up_to_date_for(at(5)));
        assert!(accumulator.up_to_date_for(at(4)));
        assert!(!accumulator.up_to_date_for(at(6)));
    }

    #[test]
    fn accumulated_changes_group_by_remote_type() {
        let mut changes = AccumulatedChanges::new();
        changes.store(ChangeKey::new("b", "Contact"), at(1), attrs(json!({ "n": 1 })));
        changes.store(ChangeKey::new("a", "Contact"), at(1), attrs(json!({ "n": 2 })));
        changes.store(ChangeKey::new("a", "Account"), at(1), attrs(json!({ "n": 3 })));

        let ids: Vec<_> = changes
            .for_remote_type("Contact")
            .map(|(key, _)| key.remote_id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(changes.len(), 3);
    }

    fn changeset() -> impl Strategy<Value = (i64, Attributes)> {
        (
            0i64..5,
            prop::collection::btree_map(
                prop::sample::select(vec!["name", "email", "title"]).prop_map(String::from),
                (0i64..4).prop_map(Value::from),
                0..3,
            ),
        )
    }

    proptest! {
        #[test]
        fn resolution_ignores_order_and_duplicates(
            changesets in prop::collection::vec(changeset(), 0..8),
            seed in any::<u64>(),
        ) {
            let mut forward = Accumulator::new();
            for (t, changeset) in &changesets {
                forward.store(at(*t), changeset.clone());
            }

            let mut shuffled = changesets.clone();
            let len = shuffled.len().max(1);
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
            shuffled.extend(changesets.iter().cloned());

            let mut other = Accumulator::new();
            for (t, changeset) in &shuffled {
                other.store(at(*t), changeset.clone());
            }

            prop_assert_eq!(forward.attributes(), other.attributes());
        }

        #[test]
        fn later_timestamp_wins(
            key in "[a-z]{1,6}",
            old in any::<i64>(),
            new in any::<i64>(),
            t1 in 0i64..1_000,
            gap in 1i64..1_000,
        ) {
            let mut accumulator = Accumulator::new();
            let mut newer = Attributes::new();
            newer.insert(key.clone(), Value::from(new));
            let mut older = Attributes::new();
            older.insert(key.clone(), Value::from(old));

            accumulator.store(at(t1 + gap), newer);
            accumulator.store(at(t1), older);

            let resolved = accumulator.attributes();
            prop_assert_eq!(resolved.get(&key), Some(&Value::from(new)));
        }

        #[test]
        fn diff_is_empty_against_resolved_state(
            changesets in prop::collection::vec(changeset(), 1..6),
        ) {
            let mut accumulator = Accumulator::new();
            for (t, changeset) in changesets {
                accumulator.store(at(t), changeset);
            }
            let resolved = accumulator.attributes();
            prop_assert!(accumulator.diff(&resolved).is_empty());
        }
    }
}
