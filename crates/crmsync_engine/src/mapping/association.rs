//! Relationships between mappings.

use crmsync_store::{value_at_path, Attributes};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of an association.
///
/// | kind | local FK column on | remote lookup on |
/// |---|---|---|
/// | `BelongsTo` | this record | this record |
/// | `HasOne`, `HasMany` | the target record | the target record |
/// | `ForeignKey` | this record | the target record |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// This record points at one target record.
    BelongsTo,
    /// One target record points back at this one.
    HasOne,
    /// Any number of target records point back at this one.
    HasMany,
    /// This record holds the local key, the target holds the remote lookup.
    ForeignKey,
}

impl AssociationKind {
    /// Returns true if the local foreign key column lives on the record
    /// declaring the association.
    pub fn foreign_key_on_source(&self) -> bool {
        matches!(self, AssociationKind::BelongsTo | AssociationKind::ForeignKey)
    }

    /// Returns true if the remote lookup field lives on the record declaring
    /// the association.
    pub fn lookup_on_source(&self) -> bool {
        matches!(self, AssociationKind::BelongsTo)
    }

    /// Returns true if the association may resolve to several records.
    pub fn is_collection(&self) -> bool {
        matches!(self, AssociationKind::HasMany)
    }
}

fn build_default() -> bool {
    true
}

/// A declared relationship from one mapping to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Relationship kind.
    pub kind: AssociationKind,
    /// Name, unique within the declaring mapping.
    pub name: String,
    /// Local type of the associated mapping.
    pub target: String,
    /// Local column holding the associated row's primary key.
    pub foreign_key: String,
    /// Remote field paths holding the associated record's id.
    pub lookups: Vec<String>,
    /// Whether a missing associated record should be created.
    #[serde(default = "build_default")]
    pub build: bool,
}

impl Association {
    fn new(
        kind: AssociationKind,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            lookups: vec![lookup.into()],
            build: true,
        }
    }

    /// This record's `foreign_key` column and `lookup` field point at the target.
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self::new(AssociationKind::BelongsTo, name, target, foreign_key, lookup)
    }

    /// One target record's `foreign_key` column and `lookup` field point here.
    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self::new(AssociationKind::HasOne, name, target, foreign_key, lookup)
    }

    /// Every target record whose `foreign_key` and `lookup` point here.
    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self::new(AssociationKind::HasMany, name, target, foreign_key, lookup)
    }

    /// This record's `foreign_key` column points at the target, whose remote
    /// `lookup` field points back here.
    pub fn foreign_key(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        lookup: impl Into<String>,
    ) -> Self {
        Self::new(AssociationKind::ForeignKey, name, target, foreign_key, lookup)
    }

    /// Adds another lookup path.
    #[must_use]
    pub fn with_lookup(mut self, lookup: impl Into<String>) -> Self {
        self.lookups.push(lookup.into());
        self
    }

    /// Only links to associated records that already exist locally.
    #[must_use]
    pub fn without_build(mut self) -> Self {
        self.build = false;
        self
    }

    /// Reads the associated remote id from a record holding the lookup.
    ///
    /// The first lookup path with a non-empty string value wins.
    pub fn lookup_value(&self, fields: &Attributes) -> Option<String> {
        self.lookups.iter().find_map(|path| match value_at_path(fields, path) {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        })
    }

    /// Returns the lookup paths that can be written back (not dotted).
    pub fn writable_lookups(&self) -> impl Iterator<Item = &str> {
        self.lookups
            .iter()
            .map(String::as_str)
            .filter(|path| !path.contains('.'))
    }

    /// Returns true if `other`, declared on the target mapping, is the inverse
    /// of this association declared on `source_type`.
    pub fn is_inverse(&self, source_type: &str, other: &Association) -> bool {
        other.target == source_type && other.foreign_key == self.foreign_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_value_follows_paths_in_order() {
        let fields: Attributes = serde_json::from_value(json!({
            "AccountId": null,
            "Account": { "Id": "001A" },
        }))
        .unwrap();

        let association =
            Association::belongs_to("account", "accounts", "account_id", "AccountId")
                .with_lookup("Account.Id");
        assert_eq!(association.lookup_value(&fields), Some("001A".into()));
        assert_eq!(association.writable_lookups().collect::<Vec<_>>(), ["AccountId"]);
    }

    #[test]
    fn kinds_place_keys() {
        assert!(AssociationKind::BelongsTo.foreign_key_on_source());
        assert!(AssociationKind::BelongsTo.lookup_on_source());
        assert!(AssociationKind::ForeignKey.foreign_key_on_source());
        assert!(!AssociationKind::ForeignKey.lookup_on_source());
        assert!(!AssociationKind::HasMany.foreign_key_on_source());
        assert!(AssociationKind::HasMany.is_collection());
        assert!(!AssociationKind::HasOne.is_collection());
    }

    #[test]
    fn inverse_shares_foreign_key() {
        let contacts = Association::belongs_to("account", "accounts", "account_id", "AccountId");
        let accounts = Association::has_many("contacts", "contacts", "account_id", "AccountId");
        let other = Association::has_many("leads", "contacts", "owner_id", "OwnerId");

        assert!(contacts.is_inverse("contacts", &accounts));
        assert!(!contacts.is_inverse("contacts", &other));
        assert!(!contacts.is_inverse("leads", &accounts));
    }

    #[test]
    fn build_defaults_to_true_in_manifests() {
        let association: Association = serde_json::from_value(json!({
            "kind": "has_one",
            "name": "profile",
            "target": "profiles",
            "foreign_key": "user_id",
            "lookups": ["User__c"],
        }))
        .unwrap();
        assert!(association.build);
        assert_eq!(association.kind, AssociationKind::HasOne);
    }
}
