//! Association resolution and construction.
//!
//! [`Links`] answers "is this already mirrored" questions against the local
//! store. [`AssociationBuilder`] creates whole local record graphs from a
//! remote root record.

mod builder;

pub use builder::{AssociationBuilder, BuildCache, BuildOutcome, NodeHandle};

use crate::error::SyncResult;
use crate::mapping::{Association, Mapping, Registry};
use crmsync_store::{LocalRecord, LocalStore, RemoteRecord};
use serde_json::Value;

/// Read-only link lookups between the two stores.
#[derive(Clone, Copy)]
pub struct Links<'a> {
    registry: &'a Registry,
    local: &'a dyn LocalStore,
}

impl<'a> Links<'a> {
    /// Creates a lookup helper.
    pub fn new(registry: &'a Registry, local: &'a dyn LocalStore) -> Self {
        Self { registry, local }
    }

    /// Finds the local row of `mapping` linked to `remote_id`.
    pub fn local_row(&self, mapping: &Mapping, remote_id: &str) -> SyncResult<Option<LocalRecord>> {
        Ok(self.local.find_by(
            mapping.local_type(),
            mapping.lookup_column(),
            &Value::String(remote_id.to_owned()),
        )?)
    }

    /// Returns true if some local row of `mapping` is linked to `remote_id`.
    pub fn is_synced(&self, mapping: &Mapping, remote_id: &str) -> SyncResult<bool> {
        Ok(self.local_row(mapping, remote_id)?.is_some())
    }

    /// Returns true if the record a `BelongsTo` association points at is
    /// linked locally.
    pub fn synced_for(&self, association: &Association, record: &RemoteRecord) -> SyncResult<bool> {
        let target = self.registry.target_of(association)?;
        match association.lookup_value(&record.fields) {
            Some(remote_id) => self.is_synced(target, &remote_id),
            None => Ok(false),
        }
    }

    /// Follows a local foreign key to the associated row and returns that
    /// row's remote id.
    ///
    /// `None` when the key is empty, the row is gone, or the row is unlinked.
    pub fn remote_id_via(
        &self,
        association: &Association,
        record: &LocalRecord,
    ) -> SyncResult<Option<String>> {
        let Some(local_id) = record.get(&association.foreign_key).and_then(Value::as_i64) else {
            return Ok(None);
        };
        let target = self.registry.target_of(association)?;
        let Some(row) = self.local.find(target.local_type(), local_id)? else {
            return Ok(None);
        };
        Ok(row
            .get(target.lookup_column())
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned))
    }
}
