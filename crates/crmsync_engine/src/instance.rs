//! Uniform views over records on either side.

use crate::error::SyncResult;
use crate::field_processor::{Action, FieldProcessor};
use crate::mapping::{Mapping, SYNC_TOKEN_FIELD};
use crmsync_store::{
    Attributes, LocalRecord, LocalStore, RemoteRecord, RemoteStore, Timestamp, WriteOrigin,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Which store a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// The local database.
    Local,
    /// The remote object store.
    Remote,
}

/// Identity of one record: its side, table or object type, and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Store the record lives in.
    pub side: Side,
    /// Local table or remote object type.
    pub record_type: String,
    /// Primary key (local) or record id (remote).
    pub id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} {}", self.side, self.record_type, self.id)
    }
}

/// A read/write view over one record.
///
/// Instances are created fresh for every lookup and hold a copy of the
/// record as it was read; writes go straight to the store and refresh the
/// copy.
pub trait Instance: Send + Sync {
    /// The mapping the record was read through.
    fn mapping(&self) -> &Arc<Mapping>;

    /// Identity of the record in its own store.
    fn key(&self) -> RecordKey;

    /// Remote id of the record or of its linked counterpart.
    fn id(&self) -> Option<&str>;

    /// Mapped attribute values, keyed by local attribute name.
    fn attributes(&self) -> Attributes;

    /// Time of the last write of any origin.
    fn last_update(&self) -> Timestamp;

    /// Returns true if the last write was made by the engine.
    fn updated_internally(&self) -> bool;

    /// Writes attributes (keyed by local attribute name).
    ///
    /// Unmapped or unwritable attributes are dropped; an update left empty
    /// does nothing.
    fn update(&mut self, attributes: &Attributes) -> SyncResult<()>;
}

/// A row of a local table.
#[derive(Clone)]
pub struct LocalInstance {
    mapping: Arc<Mapping>,
    store: Arc<dyn LocalStore>,
    record: LocalRecord,
}

impl LocalInstance {
    /// Wraps a row read through `mapping`.
    pub fn new(mapping: Arc<Mapping>, store: Arc<dyn LocalStore>, record: LocalRecord) -> Self {
        Self {
            mapping,
            store,
            record,
        }
    }

    /// The underlying row.
    pub fn record(&self) -> &LocalRecord {
        &self.record
    }

    /// Primary key.
    pub fn local_id(&self) -> i64 {
        self.record.id
    }

    /// Records the remote counterpart's id in the lookup column.
    pub fn link(&mut self, remote_id: &str) -> SyncResult<()> {
        let mut columns = Attributes::new();
        columns.insert(
            self.mapping.lookup_column().to_owned(),
            Value::String(remote_id.to_owned()),
        );
        self.write_columns(columns)
    }

    /// Writes raw columns as the engine.
    pub fn write_columns(&mut self, columns: Attributes) -> SyncResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        self.record = self.store.update(
            self.mapping.local_type(),
            self.record.id,
            columns,
            WriteOrigin::Engine,
        )?;
        Ok(())
    }
}

impl Instance for LocalInstance {
    fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    fn key(&self) -> RecordKey {
        RecordKey {
            side: Side::Local,
            record_type: self.mapping.local_type().to_owned(),
            id: self.record.id.to_string(),
        }
    }

    fn id(&self) -> Option<&str> {
        self.record
            .get(self.mapping.lookup_column())
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    fn attributes(&self) -> Attributes {
        self.mapping.fields().from_local(&self.record.columns)
    }

    fn last_update(&self) -> Timestamp {
        self.record.updated_at
    }

    fn updated_internally(&self) -> bool {
        self.record.synchronized()
    }

    fn update(&mut self, attributes: &Attributes) -> SyncResult<()> {
        let columns = self.mapping.fields().to_local(attributes);
        self.write_columns(columns)
    }
}

impl fmt::Debug for LocalInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalInstance")
            .field("table", &self.mapping.local_type())
            .field("record", &self.record)
            .finish()
    }
}

/// A record of a remote object type.
#[derive(Clone)]
pub struct RemoteInstance {
    mapping: Arc<Mapping>,
    store: Arc<dyn RemoteStore>,
    fields: Arc<FieldProcessor>,
    record: RemoteRecord,
}

impl RemoteInstance {
    /// Wraps a record read through `mapping`.
    pub fn new(
        mapping: Arc<Mapping>,
        store: Arc<dyn RemoteStore>,
        fields: Arc<FieldProcessor>,
        record: RemoteRecord,
    ) -> Self {
        Self {
            mapping,
            store,
            fields,
            record,
        }
    }

    /// The underlying record.
    pub fn record(&self) -> &RemoteRecord {
        &self.record
    }

    /// Record id.
    pub fn remote_id(&self) -> &str {
        &self.record.id
    }

    /// The correlation token left by an engine create, if any.
    pub fn sync_token(&self) -> Option<&str> {
        self.record
            .get(SYNC_TOKEN_FIELD)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }

    /// Removes the correlation token.
    pub fn clear_sync_token(&mut self) -> SyncResult<()> {
        let mut fields = Attributes::new();
        fields.insert(SYNC_TOKEN_FIELD.to_owned(), Value::Null);
        self.record = self
            .store
            .update(self.mapping.remote_type(), &self.record.id, fields)?;
        Ok(())
    }

    /// Writes raw remote fields as the engine, filtered by update permission.
    pub fn write_fields(&mut self, fields: Attributes) -> SyncResult<()> {
        let fields = self
            .fields
            .available_fields(self.mapping.remote_type(), fields, Action::Update)?;
        if fields.is_empty() {
            return Ok(());
        }
        self.record = self
            .store
            .update(self.mapping.remote_type(), &self.record.id, fields)?;
        Ok(())
    }
}

impl Instance for RemoteInstance {
    fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    fn key(&self) -> RecordKey {
        RecordKey {
            side: Side::Remote,
            record_type: self.mapping.remote_type().to_owned(),
            id: self.record.id.clone(),
        }
    }

    fn id(&self) -> Option<&str> {
        Some(&self.record.id)
    }

    fn attributes(&self) -> Attributes {
        self.mapping.fields().from_remote(&self.record.fields)
    }

    fn last_update(&self) -> Timestamp {
        self.record.last_modified
    }

    fn updated_internally(&self) -> bool {
        self.record.last_modified_by == self.store.user_id()
    }

    fn update(&mut self, attributes: &Attributes) -> SyncResult<()> {
        let fields = self.mapping.fields().to_remote(attributes);
        self.write_fields(fields)
    }
}

impl fmt::Debug for RemoteInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteInstance")
            .field("object", &self.mapping.remote_type())
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_store::{FieldDescribe, InMemoryDatabase, InMemoryRemote, ManualClock};
    use serde_json::json;
    use std::time::Duration;

    const ENGINE: &str = "005ENGINE";

    struct Fixture {
        clock: Arc<ManualClock>,
        db: Arc<InMemoryDatabase>,
        remote: Arc<InMemoryRemote>,
        mapping: Arc<Mapping>,
        processor: Arc<FieldProcessor>,
    }

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let db = Arc::new(InMemoryDatabase::new(clock.clone()));
        db.define_table("users", ["name", "title", "contact_remote_id"]);
        let remote = Arc::new(InMemoryRemote::new(clock.clone(), ENGINE));
        remote.define_object(
            "Contact",
            vec![
                FieldDescribe::writable("LastName"),
                FieldDescribe::read_only("Title"),
                FieldDescribe::writable(SYNC_TOKEN_FIELD),
            ],
        );
        let mapping = Mapping::builder("users", "Contact")
            .field("name", "LastName")
            .field("title", "Title")
            .build(db.as_ref())
            .unwrap();
        let processor = Arc::new(FieldProcessor::new(remote.clone()));
        Fixture {
            clock,
            db,
            remote,
            mapping: Arc::new(mapping),
            processor,
        }
    }

    #[test]
    fn local_instance_view() {
        let f = fixture();
        let row = f
            .db
            .insert_external("users", attrs(json!({ "name": "Ann" })))
            .unwrap();
        let mut instance = LocalInstance::new(f.mapping.clone(), f.db.clone(), row);

        assert_eq!(instance.id(), None);
        assert!(!instance.updated_internally());
        assert_eq!(
            instance.attributes(),
            attrs(json!({ "name": "Ann", "title": null }))
        );
        assert_eq!(instance.key().side, Side::Local);

        f.clock.advance(Duration::from_secs(1));
        instance.link("003A").unwrap();
        assert_eq!(instance.id(), Some("003A"));
        assert!(instance.updated_internally());
        assert_eq!(instance.last_update(), Timestamp::from_millis(2_000));
    }

    #[test]
    fn local_update_ignores_unmapped_and_empty() {
        let f = fixture();
        let row = f.db.insert_external("users", Attributes::new()).unwrap();
        let mut instance = LocalInstance::new(f.mapping.clone(), f.db.clone(), row);

        instance.update(&attrs(json!({ "bogus": 1 }))).unwrap();
        assert!(!instance.updated_internally());

        instance.update(&attrs(json!({ "name": "Bo", "bogus": 1 }))).unwrap();
        assert_eq!(instance.record().get("name"), Some(&json!("Bo")));
        assert!(instance.updated_internally());
    }

    #[test]
    fn remote_instance_view() {
        let f = fixture();
        let id = f
            .remote
            .insert_external("Contact", attrs(json!({ "LastName": "Ann", "Title": "CEO" })))
            .unwrap();
        let record = f.remote.find("Contact", &id).unwrap().unwrap();
        let mut instance =
            RemoteInstance::new(f.mapping.clone(), f.remote.clone(), f.processor.clone(), record);

        assert_eq!(instance.id(), Some(id.as_str()));
        assert!(!instance.updated_internally());
        assert_eq!(
            instance.attributes(),
            attrs(json!({ "name": "Ann", "title": "CEO" }))
        );

        instance
            .update(&attrs(json!({ "name": "Bo", "title": "CTO" })))
            .unwrap();
        assert!(instance.updated_internally());
        assert_eq!(instance.record().get("LastName"), Some(&json!("Bo")));
        assert_eq!(instance.record().get("Title"), Some(&json!("CEO")));
    }

    #[test]
    fn remote_update_with_only_read_only_fields_is_a_no_op() {
        let f = fixture();
        let id = f
            .remote
            .insert_external("Contact", attrs(json!({ "Title": "CEO" })))
            .unwrap();
        let record = f.remote.find("Contact", &id).unwrap().unwrap();
        let mut instance =
            RemoteInstance::new(f.mapping.clone(), f.remote.clone(), f.processor.clone(), record);

        instance.update(&attrs(json!({ "title": "CTO" }))).unwrap();
        assert!(!instance.updated_internally());
    }

    #[test]
    fn sync_token_round_trip() {
        let f = fixture();
        let mut fields = Attributes::new();
        fields.insert(SYNC_TOKEN_FIELD.to_owned(), json!("users::7"));
        let id = f.remote.insert_external("Contact", fields).unwrap();
        let record = f.remote.find("Contact", &id).unwrap().unwrap();
        let mut instance =
            RemoteInstance::new(f.mapping.clone(), f.remote.clone(), f.processor.clone(), record);

        assert_eq!(instance.sync_token(), Some("users::7"));
        instance.clear_sync_token().unwrap();
        assert_eq!(instance.sync_token(), None);
    }
}
