//! The set of configured mappings.

use super::{Association, BuildStrategy, Mapping};
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;

/// All mappings the engine reconciles, in registration order.
///
/// The registry is an explicit value handed to the runner and task manager;
/// tests build as many independent registries as they need.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    mappings: Vec<Arc<Mapping>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping, replacing any mapping for the same local type.
    pub fn insert(&mut self, mapping: Mapping) -> Arc<Mapping> {
        let mapping = Arc::new(mapping);
        match self
            .mappings
            .iter_mut()
            .find(|m| m.local_type() == mapping.local_type())
        {
            Some(slot) => *slot = Arc::clone(&mapping),
            None => self.mappings.push(Arc::clone(&mapping)),
        }
        mapping
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.mappings.clear();
    }

    /// Returns the number of mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if no mapping is registered.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Iterates in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mapping>> {
        self.mappings.iter()
    }

    /// Finds the mapping for a local table.
    pub fn by_local(&self, local_type: &str) -> Option<&Arc<Mapping>> {
        self.mappings.iter().find(|m| m.local_type() == local_type)
    }

    /// Finds the first mapping for a remote object type.
    pub fn by_remote(&self, remote_type: &str) -> Option<&Arc<Mapping>> {
        self.mappings.iter().find(|m| m.remote_type() == remote_type)
    }

    /// Resolves the mapping an association points at.
    pub fn target_of(&self, association: &Association) -> SyncResult<&Arc<Mapping>> {
        self.by_local(&association.target)
            .ok_or_else(|| SyncError::UnknownMapping(association.target.clone()))
    }

    /// Finds the association on the target mapping that mirrors
    /// `association`, declared on `mapping`.
    pub fn inverse_of(
        &self,
        mapping: &Mapping,
        association: &Association,
    ) -> Option<(&Arc<Mapping>, &Association)> {
        let target = self.by_local(&association.target)?;
        target
            .associations()
            .iter()
            .find(|other| association.is_inverse(mapping.local_type(), other))
            .map(|other| (target, other))
    }

    /// Checks that every association target and strategy parent exists.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first broken reference.
    pub fn validate(&self) -> SyncResult<()> {
        for mapping in &self.mappings {
            for association in mapping.associations() {
                self.target_of(association)?;
            }
            if let BuildStrategy::Associated { with } = mapping.strategy() {
                let association = mapping.association(with)?;
                if !association.kind.lookup_on_source() {
                    return Err(SyncError::invalid_mapping(
                        mapping.local_type(),
                        mapping.remote_type(),
                        format!("strategy parent {with} is not a belongs-to association"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_store::{InMemoryDatabase, ManualClock, Timestamp};

    fn database() -> InMemoryDatabase {
        let db = InMemoryDatabase::new(Arc::new(ManualClock::new(Timestamp::EPOCH)));
        db.define_table("accounts", ["name", "account_remote_id"]);
        db.define_table("contacts", ["name", "account_id", "contact_remote_id"]);
        db
    }

    fn accounts(db: &InMemoryDatabase) -> Mapping {
        Mapping::builder("accounts", "Account")
            .field("name", "Name")
            .association(Association::has_many(
                "contacts",
                "contacts",
                "account_id",
                "AccountId",
            ))
            .build(db)
            .unwrap()
    }

    fn contacts(db: &InMemoryDatabase) -> Mapping {
        Mapping::builder("contacts", "Contact")
            .field("name", "LastName")
            .association(Association::belongs_to(
                "account",
                "accounts",
                "account_id",
                "AccountId",
            ))
            .strategy(BuildStrategy::associated("account"))
            .build(db)
            .unwrap()
    }

    #[test]
    fn lookup_by_either_side() {
        let db = database();
        let mut registry = Registry::new();
        registry.insert(accounts(&db));
        registry.insert(contacts(&db));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_local("contacts").unwrap().remote_type(), "Contact");
        assert_eq!(registry.by_remote("Account").unwrap().local_type(), "accounts");
        assert!(registry.by_remote("Lead").is_none());
        registry.validate().unwrap();

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn insert_replaces_same_local_type() {
        let db = database();
        let mut registry = Registry::new();
        registry.insert(accounts(&db));
        registry.insert(accounts(&db));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolves_inverse_associations() {
        let db = database();
        let mut registry = Registry::new();
        let accounts = registry.insert(accounts(&db));
        let contacts = registry.insert(contacts(&db));

        let (target, inverse) = registry
            .inverse_of(&contacts, &contacts.associations()[0])
            .unwrap();
        assert_eq!(target.local_type(), "accounts");
        assert_eq!(inverse.name, "contacts");
        assert_eq!(Arc::as_ptr(target), Arc::as_ptr(&accounts));
    }

    #[test]
    fn validate_reports_missing_targets() {
        let db = database();
        let mut registry = Registry::new();
        registry.insert(contacts(&db));

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, SyncError::UnknownMapping(ref name) if name == "accounts"));
        assert!(err.is_configuration());
    }

    #[test]
    fn validate_reports_unknown_strategy_parent() {
        let db = database();
        let mut registry = Registry::new();
        registry.insert(accounts(&db));
        registry.insert(
            Mapping::builder("contacts", "Contact")
                .strategy(BuildStrategy::associated("owner"))
                .build(&db)
                .unwrap(),
        );

        assert!(matches!(
            registry.validate(),
            Err(SyncError::UnknownAssociation { .. })
        ));
    }
}
