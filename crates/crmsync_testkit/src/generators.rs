//! Property-based test generators using proptest.
//!
//! Provides strategies for changesets, timestamps and record names.

use crmsync_store::{Attributes, Timestamp};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for attribute names drawn from a small pool, so changesets
/// overlap often.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["name", "industry", "email", "phone", "title"])
        .prop_map(str::to_owned)
}

/// Strategy for scalar JSON values, including null.
pub fn attribute_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000i64..1_000).prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// Strategy for a changeset of up to five attributes.
pub fn changeset_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(attribute_name_strategy(), attribute_value_strategy(), 0..5)
}

/// Strategy for timestamps within a few seconds of each other, so
/// collisions happen.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..5_000).prop_map(|offset| Timestamp::from_millis(1_700_000_000_000 + offset))
}

/// Strategy for a history of timestamped changesets.
pub fn history_strategy() -> impl Strategy<Value = Vec<(Timestamp, Attributes)>> {
    prop::collection::vec((timestamp_strategy(), changeset_strategy()), 0..12)
}

/// Strategy for record names that survive both stores unchanged.
pub fn record_name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,11}( [A-Z][a-z]{1,11})?"
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn changesets_use_the_shared_pool() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let changeset = changeset_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(changeset.len() <= 5);
            assert!(changeset
                .keys()
                .all(|k| ["name", "industry", "email", "phone", "title"].contains(&k.as_str())));
        }
    }

    proptest! {
        #[test]
        fn record_names_are_non_empty(name in record_name_strategy()) {
            prop_assert!(!name.trim().is_empty());
        }
    }
}
