//! In-memory remote object store.

use crate::backend::{FieldDescribe, RemoteQuery, RemoteStore};
use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::types::{Attributes, RemoteRecord, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// User id stamped on writes made through the `*_external` helpers.
pub const EXTERNAL_USER_ID: &str = "005EXTERNALUSER";

/// Serializable contents of an [`InMemoryRemote`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Id of the user the engine writes as.
    pub user_id: String,
    /// Object types by name.
    pub objects: BTreeMap<String, ObjectSnapshot>,
}

/// Serializable contents of one object type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Field metadata.
    pub fields: Vec<FieldDescribe>,
    /// Live records.
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    /// Deletion log.
    #[serde(default)]
    pub deleted: Vec<DeletedRecord>,
}

/// An entry in an object's deletion log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    /// Id of the deleted record.
    pub id: String,
    /// Time of deletion.
    pub deleted_at: Timestamp,
}

#[derive(Debug, Default)]
struct RemoteObject {
    fields: Vec<FieldDescribe>,
    records: BTreeMap<String, RemoteRecord>,
    deleted: Vec<DeletedRecord>,
    read_only: bool,
}

/// A remote object store held in memory.
///
/// Writes through [`RemoteStore`] are attributed to the engine's user id;
/// the `*_external` helpers write as [`EXTERNAL_USER_ID`], standing in for
/// people editing records in the CRM.
pub struct InMemoryRemote {
    clock: Arc<dyn Clock>,
    user_id: String,
    objects: RwLock<BTreeMap<String, RemoteObject>>,
}

impl InMemoryRemote {
    /// Creates an empty store. Engine writes are attributed to `user_id`.
    pub fn new(clock: Arc<dyn Clock>, user_id: impl Into<String>) -> Self {
        Self {
            clock,
            user_id: user_id.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(clock: Arc<dyn Clock>, snapshot: RemoteSnapshot) -> Self {
        let objects = snapshot
            .objects
            .into_iter()
            .map(|(name, object)| {
                let object = RemoteObject {
                    fields: object.fields,
                    records: object
                        .records
                        .into_iter()
                        .map(|record| (record.id.clone(), record))
                        .collect(),
                    deleted: object.deleted,
                    read_only: false,
                };
                (name, object)
            })
            .collect();

        Self {
            clock,
            user_id: snapshot.user_id,
            objects: RwLock::new(objects),
        }
    }

    /// Returns a snapshot of every object type.
    #[must_use]
    pub fn snapshot(&self) -> RemoteSnapshot {
        let objects = self
            .objects
            .read()
            .iter()
            .map(|(name, object)| {
                let snapshot = ObjectSnapshot {
                    fields: object.fields.clone(),
                    records: object.records.values().cloned().collect(),
                    deleted: object.deleted.clone(),
                };
                (name.clone(), snapshot)
            })
            .collect();
        RemoteSnapshot {
            user_id: self.user_id.clone(),
            objects,
        }
    }

    /// Creates (or replaces) an object type with the given field metadata.
    pub fn define_object(&self, object: &str, fields: Vec<FieldDescribe>) {
        let object_def = RemoteObject {
            fields,
            ..RemoteObject::default()
        };
        self.objects.write().insert(object.to_owned(), object_def);
    }

    /// Makes every write to `object` fail, to simulate a rejected request.
    pub fn set_read_only(&self, object: &str, read_only: bool) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let object_def = objects
            .get_mut(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
        object_def.read_only = read_only;
        Ok(())
    }

    /// Returns every live record of `object`.
    pub fn records(&self, object: &str) -> StoreResult<Vec<RemoteRecord>> {
        let objects = self.objects.read();
        let object_def = objects
            .get(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
        Ok(object_def.records.values().cloned().collect())
    }

    /// Returns the number of live records of `object` (zero for unknown types).
    #[must_use]
    pub fn count(&self, object: &str) -> usize {
        self.objects.read().get(object).map_or(0, |o| o.records.len())
    }

    /// Creates a record as another CRM user would.
    pub fn insert_external(&self, object: &str, fields: Attributes) -> StoreResult<String> {
        self.create(object, fields, EXTERNAL_USER_ID)
    }

    /// Updates a record as another CRM user would.
    pub fn update_external(
        &self,
        object: &str,
        id: &str,
        fields: Attributes,
    ) -> StoreResult<RemoteRecord> {
        self.modify(object, id, fields, EXTERNAL_USER_ID)
    }

    /// Deletes a record as another CRM user would, logging the deletion.
    pub fn delete_external(&self, object: &str, id: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let mut objects = self.objects.write();
        let object_def = Self::writable(&mut objects, object)?;
        object_def
            .records
            .remove(id)
            .ok_or_else(|| StoreError::RecordNotFound {
                object: object.to_owned(),
                id: id.to_owned(),
            })?;
        object_def.deleted.push(DeletedRecord {
            id: id.to_owned(),
            deleted_at: now,
        });
        Ok(())
    }

    fn create(&self, object: &str, fields: Attributes, user: &str) -> StoreResult<String> {
        let mut objects = self.objects.write();
        let object_def = Self::writable(&mut objects, object)?;

        let id = Uuid::new_v4().simple().to_string()[..18].to_owned();
        let record = RemoteRecord {
            id: id.clone(),
            fields,
            last_modified: self.clock.now(),
            last_modified_by: user.to_owned(),
        };
        object_def.records.insert(id.clone(), record);
        Ok(id)
    }

    fn modify(
        &self,
        object: &str,
        id: &str,
        fields: Attributes,
        user: &str,
    ) -> StoreResult<RemoteRecord> {
        let mut objects = self.objects.write();
        let object_def = Self::writable(&mut objects, object)?;
        let record = object_def
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound {
                object: object.to_owned(),
                id: id.to_owned(),
            })?;

        record.fields.extend(fields);
        record.last_modified = self.clock.now();
        record.last_modified_by = user.to_owned();
        Ok(record.clone())
    }

    fn writable<'a>(
        objects: &'a mut BTreeMap<String, RemoteObject>,
        object: &str,
    ) -> StoreResult<&'a mut RemoteObject> {
        let object_def = objects
            .get_mut(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
        if object_def.read_only {
            return Err(StoreError::validation(format!(
                "insufficient access rights on {object}"
            )));
        }
        Ok(object_def)
    }
}

impl RemoteStore for InMemoryRemote {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn describe(&self, object: &str) -> StoreResult<Vec<FieldDescribe>> {
        self.objects
            .read()
            .get(object)
            .map(|o| o.fields.clone())
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))
    }

    fn find(&self, object: &str, id: &str) -> StoreResult<Option<RemoteRecord>> {
        let objects = self.objects.read();
        let object_def = objects
            .get(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
        Ok(object_def.records.get(id).cloned())
    }

    fn query(&self, object: &str, query: &RemoteQuery) -> StoreResult<Vec<RemoteRecord>> {
        let objects = self.objects.read();
        let object_def = objects
            .get(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;

        let mut records: Vec<RemoteRecord> = object_def
            .records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    fn upsert(
        &self,
        object: &str,
        external_field: &str,
        external_value: &str,
        mut fields: Attributes,
    ) -> StoreResult<String> {
        let external = Value::String(external_value.to_owned());
        let existing = {
            let objects = self.objects.read();
            let object_def = objects
                .get(object)
                .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
            object_def
                .records
                .values()
                .find(|record| record.fields.get(external_field) == Some(&external))
                .map(|record| record.id.clone())
        };

        fields.insert(external_field.to_owned(), external);
        match existing {
            Some(id) => {
                self.modify(object, &id, fields, &self.user_id)?;
                Ok(id)
            }
            None => self.create(object, fields, &self.user_id),
        }
    }

    fn update(&self, object: &str, id: &str, fields: Attributes) -> StoreResult<RemoteRecord> {
        self.modify(object, id, fields, &self.user_id)
    }

    fn deleted_between(
        &self,
        object: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> StoreResult<Vec<String>> {
        let objects = self.objects.read();
        let object_def = objects
            .get(object)
            .ok_or_else(|| StoreError::UnknownObject(object.to_owned()))?;
        Ok(object_def
            .deleted
            .iter()
            .filter(|entry| entry.deleted_at > start && entry.deleted_at <= end)
            .map(|entry| entry.id.clone())
            .collect())
    }
}
