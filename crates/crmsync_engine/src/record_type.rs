//! Per-side record type adapters.
//!
//! [`LocalRecordType`] and [`RemoteRecordType`] give both stores the same
//! shape for one mapping: find a record, list the records of a window,
//! create a counterpart from a record on the other side.

use crate::associations::{AssociationBuilder, BuildCache, BuildOutcome, Links};
use crate::error::{SyncError, SyncResult};
use crate::field_processor::{Action, FieldProcessor};
use crate::instance::{Instance, LocalInstance, RemoteInstance};
use crate::mapping::{AssociationKind, Mapping, Registry, SYNC_TOKEN_FIELD};
use crate::runner::Window;
use crmsync_store::{
    Condition, LocalRecord, LocalStore, RemoteQuery, RemoteRecord, RemoteStore, StoreError,
    Timestamp,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// The two stores plus the remote field permission filter.
#[derive(Clone)]
pub struct Backends {
    /// Local database.
    pub local: Arc<dyn LocalStore>,
    /// Remote object store.
    pub remote: Arc<dyn RemoteStore>,
    /// Field permission filter for `remote`.
    pub fields: Arc<FieldProcessor>,
}

impl Backends {
    /// Bundles two stores with a fresh field processor.
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        let fields = Arc::new(FieldProcessor::new(Arc::clone(&remote)));
        Self {
            local,
            remote,
            fields,
        }
    }
}

/// The local table of one mapping.
pub struct LocalRecordType<'a> {
    mapping: &'a Arc<Mapping>,
    backends: &'a Backends,
    registry: &'a Registry,
}

impl<'a> LocalRecordType<'a> {
    pub(crate) fn new(mapping: &'a Arc<Mapping>, backends: &'a Backends, registry: &'a Registry) -> Self {
        Self {
            mapping,
            backends,
            registry,
        }
    }

    /// Wraps a row.
    pub fn instance(&self, record: LocalRecord) -> LocalInstance {
        LocalInstance::new(
            Arc::clone(self.mapping),
            Arc::clone(&self.backends.local),
            record,
        )
    }

    /// Finds the row linked to a remote id.
    pub fn find(&self, remote_id: &str) -> SyncResult<Option<LocalInstance>> {
        let row = Links::new(self.registry, self.backends.local.as_ref())
            .local_row(self.mapping, remote_id)?;
        Ok(row.map(|row| self.instance(row)))
    }

    /// Finds a row by primary key.
    pub fn find_by_id(&self, id: i64) -> SyncResult<Option<LocalInstance>> {
        let row = self.backends.local.find(self.mapping.local_type(), id)?;
        Ok(row.map(|row| self.instance(row)))
    }

    /// Rows updated inside `window`.
    pub fn all(&self, window: Window) -> SyncResult<Vec<LocalInstance>> {
        let rows = self.backends.local.changed_between(
            self.mapping.local_type(),
            window.after,
            window.before,
        )?;
        Ok(rows.into_iter().map(|row| self.instance(row)).collect())
    }

    /// Mirrors a remote record and its associated records locally.
    pub fn create(
        &self,
        source: &RemoteInstance,
        cache: &mut BuildCache,
    ) -> SyncResult<(LocalInstance, BuildOutcome)> {
        let outcome = AssociationBuilder::new(self.registry, self.backends, cache).build(source)?;
        let root = self.instance(outcome.root.clone());
        Ok((root, outcome))
    }

    /// Deletes every row linked to one of `remote_ids`.
    pub fn destroy_all(&self, remote_ids: &[String]) -> SyncResult<usize> {
        if remote_ids.is_empty() {
            return Ok(0);
        }
        let values: Vec<Value> = remote_ids.iter().cloned().map(Value::String).collect();
        Ok(self.backends.local.delete_where_in(
            self.mapping.local_type(),
            self.mapping.lookup_column(),
            &values,
        )?)
    }
}

/// The remote object type of one mapping.
pub struct RemoteRecordType<'a> {
    mapping: &'a Arc<Mapping>,
    backends: &'a Backends,
    registry: &'a Registry,
}

impl<'a> RemoteRecordType<'a> {
    pub(crate) fn new(mapping: &'a Arc<Mapping>, backends: &'a Backends, registry: &'a Registry) -> Self {
        Self {
            mapping,
            backends,
            registry,
        }
    }

    /// Wraps a record.
    pub fn instance(&self, record: RemoteRecord) -> RemoteInstance {
        RemoteInstance::new(
            Arc::clone(self.mapping),
            Arc::clone(&self.backends.remote),
            Arc::clone(&self.backends.fields),
            record,
        )
    }

    /// Finds a record by id.
    pub fn find(&self, id: &str) -> SyncResult<Option<RemoteInstance>> {
        let record = self.backends.remote.find(self.mapping.remote_type(), id)?;
        Ok(record.map(|record| self.instance(record)))
    }

    /// First record matching `conditions` in addition to the mapping's own.
    pub fn first(&self, conditions: &[Condition]) -> SyncResult<Option<RemoteInstance>> {
        let all: Vec<Condition> = self
            .mapping
            .conditions()
            .iter()
            .chain(conditions)
            .cloned()
            .collect();
        let record = self.backends.remote.first(self.mapping.remote_type(), &all)?;
        Ok(record.map(|record| self.instance(record)))
    }

    /// Records modified inside `window` that match the mapping's conditions.
    pub fn all(&self, window: Window) -> SyncResult<Vec<RemoteInstance>> {
        let query = RemoteQuery::new()
            .window(window.after, window.before)
            .conditions(self.mapping.conditions().iter().cloned());
        let records = self.backends.remote.query(self.mapping.remote_type(), &query)?;
        Ok(records.into_iter().map(|record| self.instance(record)).collect())
    }

    /// Ids of records deleted in `(start, end]`.
    pub fn deleted_between(&self, start: Timestamp, end: Timestamp) -> SyncResult<Vec<String>> {
        Ok(self
            .backends
            .remote
            .deleted_between(self.mapping.remote_type(), start, end)?)
    }

    /// Creates the remote counterpart of a local row and links the row.
    ///
    /// The create is an upsert keyed by the row's correlation token, so a
    /// retry after a failure between the two writes does not duplicate the
    /// record; the token is cleared later by the attacher.
    pub fn create(&self, source: &mut LocalInstance) -> SyncResult<RemoteInstance> {
        let remote_type = self.mapping.remote_type();
        let mut fields = self.mapping.fields().to_remote(&source.attributes());
        fields.retain(|_, value| !value.is_null());

        let links = Links::new(self.registry, self.backends.local.as_ref());
        for association in self.mapping.associations() {
            if association.kind != AssociationKind::BelongsTo {
                continue;
            }
            let Some(lookup) = association.writable_lookups().next() else {
                continue;
            };
            if let Some(remote_id) = links.remote_id_via(association, source.record())? {
                fields.insert(lookup.to_owned(), Value::String(remote_id));
            }
        }

        let fields = self
            .backends
            .fields
            .available_fields(remote_type, fields, Action::Create)?;
        let token = self.mapping.sync_token(source.local_id());
        let id = self
            .backends
            .remote
            .upsert(remote_type, SYNC_TOKEN_FIELD, &token, fields)?;
        debug!(remote_type, remote_id = %id, token = %token, "created remote record");

        source.link(&id)?;
        let record = self
            .backends
            .remote
            .find(remote_type, &id)?
            .ok_or_else(|| {
                SyncError::from(StoreError::RecordNotFound {
                    object: remote_type.to_owned(),
                    id: id.clone(),
                })
            })?;
        Ok(self.instance(record))
    }
}
