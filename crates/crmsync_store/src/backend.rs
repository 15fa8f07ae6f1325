//! Store contracts consumed by the reconciliation engine.

use crate::condition::Condition;
use crate::error::StoreResult;
use crate::types::{Attributes, LocalRecord, RemoteRecord, Timestamp, WriteOrigin};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The local relational database.
///
/// Tables hold rows with an integer primary key, arbitrary columns and two
/// bookkeeping timestamps (`updated_at`, `synchronized_at`). The engine never
/// issues SQL; it only needs the operations below.
///
/// # Invariants
///
/// - Every write stamps `updated_at` with the store's current time
/// - Writes with [`WriteOrigin::Engine`] also stamp `synchronized_at` with the
///   same time
/// - Implementations must be `Send + Sync`
pub trait LocalStore: Send + Sync {
    /// Returns the column names of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn columns(&self, table: &str) -> StoreResult<Vec<String>>;

    /// Finds a row by primary key.
    fn find(&self, table: &str, id: i64) -> StoreResult<Option<LocalRecord>>;

    /// Finds the first row (lowest primary key) whose `column` equals `value`.
    fn find_by(&self, table: &str, column: &str, value: &Value) -> StoreResult<Option<LocalRecord>>;

    /// Returns the rows with `after < updated_at <= before`.
    ///
    /// A missing `after` leaves the window unbounded below.
    fn changed_between(
        &self,
        table: &str,
        after: Option<Timestamp>,
        before: Timestamp,
    ) -> StoreResult<Vec<LocalRecord>>;

    /// Inserts a row and returns it with its assigned primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if a column does not exist on the table.
    fn insert(
        &self,
        table: &str,
        columns: Attributes,
        origin: WriteOrigin,
    ) -> StoreResult<LocalRecord>;

    /// Merges `columns` into an existing row and returns the updated row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row or a column does not exist.
    fn update(
        &self,
        table: &str,
        id: i64,
        columns: Attributes,
        origin: WriteOrigin,
    ) -> StoreResult<LocalRecord>;

    /// Deletes every row whose `column` is one of `values`.
    ///
    /// Returns the number of deleted rows.
    fn delete_where_in(&self, table: &str, column: &str, values: &[Value]) -> StoreResult<usize>;
}

/// A query against one remote object type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteQuery {
    /// Only records modified strictly after this time.
    pub after: Option<Timestamp>,
    /// Only records modified at or before this time.
    pub before: Option<Timestamp>,
    /// Field conditions, all of which must match.
    pub conditions: Vec<Condition>,
}

impl RemoteQuery {
    /// Creates an unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the query to a modification window.
    #[must_use]
    pub fn window(mut self, after: Option<Timestamp>, before: Timestamp) -> Self {
        self.after = after;
        self.before = Some(before);
        self
    }

    /// Adds conditions.
    #[must_use]
    pub fn conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Returns true if the record falls inside the window and matches.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        self.after.map_or(true, |after| record.last_modified > after)
            && self.before.map_or(true, |before| record.last_modified <= before)
            && Condition::all_match(&self.conditions, &record.fields)
    }
}

/// Permissions of one remote field, as reported by the store's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescribe {
    /// Field name.
    pub name: String,
    /// Whether the field may be set on create.
    pub createable: bool,
    /// Whether the field may be set on update.
    pub updateable: bool,
}

impl FieldDescribe {
    /// A field writable on both create and update.
    pub fn writable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            createable: true,
            updateable: true,
        }
    }

    /// A field that can never be written.
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            createable: false,
            updateable: false,
        }
    }

    /// A field that can only be written on create.
    pub fn create_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            createable: true,
            updateable: false,
        }
    }
}

/// The remote CRM-style object store.
///
/// Every write through this trait is attributed to [`RemoteStore::user_id`],
/// which is how the engine recognizes its own modifications.
pub trait RemoteStore: Send + Sync {
    /// Returns the id of the user the engine writes as.
    fn user_id(&self) -> String;

    /// Returns field metadata for an object type.
    ///
    /// # Errors
    ///
    /// Returns an error if the object type does not exist.
    fn describe(&self, object: &str) -> StoreResult<Vec<FieldDescribe>>;

    /// Finds a record by id.
    fn find(&self, object: &str, id: &str) -> StoreResult<Option<RemoteRecord>>;

    /// Returns the records matching `query`, oldest modification first.
    fn query(&self, object: &str, query: &RemoteQuery) -> StoreResult<Vec<RemoteRecord>>;

    /// Returns the first record matching `conditions`, ignoring modification times.
    fn first(&self, object: &str, conditions: &[Condition]) -> StoreResult<Option<RemoteRecord>> {
        let query = RemoteQuery::new().conditions(conditions.iter().cloned());
        Ok(self.query(object, &query)?.into_iter().next())
    }

    /// Creates or updates the record whose `external_field` equals
    /// `external_value`, and returns its id.
    ///
    /// Repeating the call with the same external value never creates a second
    /// record.
    fn upsert(
        &self,
        object: &str,
        external_field: &str,
        external_value: &str,
        fields: Attributes,
    ) -> StoreResult<String>;

    /// Merges `fields` into an existing record and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist.
    fn update(&self, object: &str, id: &str, fields: Attributes) -> StoreResult<RemoteRecord>;

    /// Returns the ids of records deleted in `(start, end]`.
    fn deleted_between(
        &self,
        object: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> StoreResult<Vec<String>>;
}
