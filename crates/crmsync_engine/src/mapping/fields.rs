//! Attribute ↔ field correspondence for one mapping.

use crmsync_store::{value_at_path, Attributes};
use serde_json::Value;
use std::collections::HashSet;

/// A one-to-one map between local attribute names and remote field paths.
///
/// Engine-internal attribute sets are always keyed by the local names; the
/// map converts remote values into that namespace and back. Remote paths
/// containing a `.` address fields of related objects and are read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    pairs: Vec<(String, String)>,
}

impl FieldMap {
    /// Creates an empty field map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair.
    pub fn insert(&mut self, local: impl Into<String>, remote: impl Into<String>) {
        self.pairs.push((local.into(), remote.into()));
    }

    /// Iterates over `(local, remote)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(l, r)| (l.as_str(), r.as_str()))
    }

    /// Iterates over the local attribute names.
    pub fn local_attributes(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(l, _)| l.as_str())
    }

    /// Iterates over the remote field paths.
    pub fn remote_fields(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, r)| r.as_str())
    }

    /// Returns the remote field for a local attribute.
    pub fn remote_field(&self, local: &str) -> Option<&str> {
        self.iter().find(|(l, _)| *l == local).map(|(_, r)| r)
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if the map has no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Reads every mapped field of a remote record, keyed by local name.
    ///
    /// Missing fields read as `null`.
    pub fn from_remote(&self, fields: &Attributes) -> Attributes {
        self.iter()
            .map(|(local, remote)| {
                let value = value_at_path(fields, remote).cloned().unwrap_or(Value::Null);
                (local.to_owned(), value)
            })
            .collect()
    }

    /// Reads every mapped column of a local row.
    ///
    /// Missing columns read as `null`.
    pub fn from_local(&self, columns: &Attributes) -> Attributes {
        self.local_attributes()
            .map(|local| {
                let value = columns.get(local).cloned().unwrap_or(Value::Null);
                (local.to_owned(), value)
            })
            .collect()
    }

    /// Renames local attributes to remote fields, dropping unmapped keys and
    /// read-only (dotted) paths.
    pub fn to_remote(&self, attributes: &Attributes) -> Attributes {
        self.iter()
            .filter(|(_, remote)| !remote.contains('.'))
            .filter_map(|(local, remote)| {
                attributes
                    .get(local)
                    .map(|value| (remote.to_owned(), value.clone()))
            })
            .collect()
    }

    /// Keeps only mapped local attributes.
    pub fn to_local(&self, attributes: &Attributes) -> Attributes {
        self.local_attributes()
            .filter_map(|local| {
                attributes
                    .get(local)
                    .map(|value| (local.to_owned(), value.clone()))
            })
            .collect()
    }

    /// Checks that the map is a bijection.
    pub(crate) fn check(&self) -> Result<(), String> {
        let mut locals = HashSet::new();
        let mut remotes = HashSet::new();
        for (local, remote) in self.iter() {
            if !locals.insert(local) {
                return Err(format!("attribute {local} is mapped more than once"));
            }
            if !remotes.insert(remote) {
                return Err(format!("field {remote} is mapped more than once"));
            }
        }
        Ok(())
    }
}

impl<L, R> FromIterator<(L, R)> for FieldMap
where
    L: Into<String>,
    R: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (L, R)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (local, remote) in iter {
            map.insert(local, remote);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn map() -> FieldMap {
        [
            ("name", "Name"),
            ("email", "Email"),
            ("owner_name", "Owner.Name"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn reads_remote_into_local_names() {
        let fields = attrs(json!({
            "Name": "Ann",
            "Owner": { "Name": "Bo" },
            "Unmapped": 1,
        }));
        assert_eq!(
            map().from_remote(&fields),
            attrs(json!({ "name": "Ann", "email": null, "owner_name": "Bo" }))
        );
    }

    #[test]
    fn writes_only_plain_mapped_fields() {
        let attributes = attrs(json!({ "name": "Ann", "owner_name": "Bo", "extra": 1 }));
        assert_eq!(map().to_remote(&attributes), attrs(json!({ "Name": "Ann" })));
        assert_eq!(
            map().to_local(&attributes),
            attrs(json!({ "name": "Ann", "owner_name": "Bo" }))
        );
    }

    #[test]
    fn detects_non_bijective_maps() {
        let duplicate_local: FieldMap = [("name", "Name"), ("name", "Other")].into_iter().collect();
        assert!(duplicate_local.check().is_err());

        let duplicate_remote: FieldMap = [("a", "Name"), ("b", "Name")].into_iter().collect();
        assert!(duplicate_remote.check().is_err());

        assert!(map().check().is_ok());
    }
}
