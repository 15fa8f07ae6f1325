//! Record types shared by both stores and the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A set of named values, keyed by column or field name.
///
/// A `BTreeMap` keeps iteration order deterministic, which matters for
/// comparisons and logging.
pub type Attributes = BTreeMap<String, Value>;

/// A point in time, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp moved back by `duration`.
    #[must_use]
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Returns this timestamp moved forward by `duration`.
    #[must_use]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Returns the time elapsed between `earlier` and `self`, or zero.
    #[must_use]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        u64::try_from(self.0.saturating_sub(earlier.0))
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Who performed a write.
///
/// The local store records engine writes by stamping `synchronized_at`
/// alongside `updated_at`, which is how a later cycle tells its own writes
/// apart from edits made by users of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The write was made by the reconciliation engine.
    Engine,
    /// The write was made by anyone else.
    External,
}

/// A row in a local table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Primary key.
    pub id: i64,
    /// Column values (excluding the bookkeeping timestamps).
    pub columns: Attributes,
    /// Time of the last write of any origin.
    pub updated_at: Timestamp,
    /// Time of the last engine write, if any.
    pub synchronized_at: Option<Timestamp>,
}

impl LocalRecord {
    /// Returns the value of `column`, if present and not null.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).filter(|value| !value.is_null())
    }

    /// Returns true if the last write was made by the engine.
    pub fn synchronized(&self) -> bool {
        self.synchronized_at
            .is_some_and(|synchronized_at| synchronized_at >= self.updated_at)
    }
}

/// An object in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote identifier.
    pub id: String,
    /// Field values. Relationship fields may hold nested objects.
    pub fields: Attributes,
    /// Time of the last modification.
    pub last_modified: Timestamp,
    /// Id of the user who made the last modification.
    pub last_modified_by: String,
}

impl RemoteRecord {
    /// Returns the value at a dot-separated field path, if present and not null.
    pub fn get(&self, path: &str) -> Option<&Value> {
        value_at_path(&self.fields, path).filter(|value| !value.is_null())
    }
}

/// Resolves a dot-separated path (`"Owner.Manager.Id"`) through nested objects.
///
/// Returns `None` when any segment is missing or an intermediate value is not
/// an object.
pub fn value_at_path<'a>(attributes: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Renders a value the way it is written into correlation keys and logs:
/// strings without quotes, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_millis(10_000);
        assert_eq!(t.saturating_sub(Duration::from_secs(3)).as_millis(), 7_000);
        assert_eq!(t.saturating_add(Duration::from_millis(5)).as_millis(), 10_005);
        assert_eq!(
            t.duration_since(Timestamp::from_millis(4_000)),
            Duration::from_secs(6)
        );
        assert_eq!(Timestamp::EPOCH.duration_since(t), Duration::ZERO);
    }

    #[test]
    fn nested_path_lookup() {
        let fields = attrs(json!({
            "Name": "Acme",
            "Owner": { "Manager": { "Id": "005A" } },
        }));

        assert_eq!(value_at_path(&fields, "Name"), Some(&json!("Acme")));
        assert_eq!(value_at_path(&fields, "Owner.Manager.Id"), Some(&json!("005A")));
        assert_eq!(value_at_path(&fields, "Owner.Missing"), None);
        assert_eq!(value_at_path(&fields, "Name.Length"), None);
    }

    #[test]
    fn local_record_synchronized_flag() {
        let mut record = LocalRecord {
            id: 1,
            columns: Attributes::new(),
            updated_at: Timestamp::from_millis(20),
            synchronized_at: None,
        };
        assert!(!record.synchronized());

        record.synchronized_at = Some(Timestamp::from_millis(20));
        assert!(record.synchronized());

        record.updated_at = Timestamp::from_millis(21);
        assert!(!record.synchronized());
    }

    #[test]
    fn get_skips_nulls() {
        let record = RemoteRecord {
            id: "a".into(),
            fields: attrs(json!({ "Email": null, "Name": "X" })),
            last_modified: Timestamp::EPOCH,
            last_modified_by: "u".into(),
        };
        assert_eq!(record.get("Email"), None);
        assert_eq!(record.get("Name"), Some(&json!("X")));
    }
}
