//! In-memory local database.

use crate::backend::LocalStore;
use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::types::{Attributes, LocalRecord, Timestamp, WriteOrigin};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Serializable contents of an [`InMemoryDatabase`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    /// Tables by name.
    pub tables: BTreeMap<String, TableSnapshot>,
}

/// Serializable contents of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Column names.
    pub columns: Vec<String>,
    /// Columns that may not be null.
    #[serde(default)]
    pub required: Vec<String>,
    /// Rows in primary key order.
    #[serde(default)]
    pub rows: Vec<LocalRecord>,
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    required: BTreeSet<String>,
    rows: BTreeMap<i64, LocalRecord>,
    next_id: i64,
    read_only: bool,
}

impl Table {
    fn check_columns(&self, table: &str, columns: &Attributes) -> StoreResult<()> {
        match columns.keys().find(|column| !self.columns.contains(*column)) {
            Some(column) => Err(StoreError::UnknownColumn {
                table: table.to_owned(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_required(&self, record: &LocalRecord) -> StoreResult<()> {
        match self.required.iter().find(|column| record.get(column).is_none()) {
            Some(column) => Err(StoreError::validation(format!("{column} can't be blank"))),
            None => Ok(()),
        }
    }
}

/// A local database held in memory.
///
/// Suitable for tests and for the CLI's file-backed state, which loads and
/// saves [`DatabaseSnapshot`]s.
///
/// # Thread Safety
///
/// All tables sit behind one lock; the database can be shared across threads.
pub struct InMemoryDatabase {
    clock: Arc<dyn Clock>,
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryDatabase {
    /// Creates an empty database stamping writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Restores a database from a snapshot.
    pub fn from_snapshot(clock: Arc<dyn Clock>, snapshot: DatabaseSnapshot) -> Self {
        let tables = snapshot
            .tables
            .into_iter()
            .map(|(name, table)| {
                let next_id = table.rows.iter().map(|row| row.id).max().unwrap_or(0) + 1;
                let table = Table {
                    columns: table.columns,
                    required: table.required.into_iter().collect(),
                    rows: table.rows.into_iter().map(|row| (row.id, row)).collect(),
                    next_id,
                    read_only: false,
                };
                (name, table)
            })
            .collect();

        Self {
            clock,
            tables: RwLock::new(tables),
        }
    }

    /// Returns a snapshot of all tables.
    #[must_use]
    pub fn snapshot(&self) -> DatabaseSnapshot {
        let tables = self
            .tables
            .read()
            .iter()
            .map(|(name, table)| {
                let snapshot = TableSnapshot {
                    columns: table.columns.clone(),
                    required: table.required.iter().cloned().collect(),
                    rows: table.rows.values().cloned().collect(),
                };
                (name.clone(), snapshot)
            })
            .collect();
        DatabaseSnapshot { tables }
    }

    /// Creates (or replaces) a table with the given columns.
    pub fn define_table<I, S>(&self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table_def = Table {
            columns: columns.into_iter().map(Into::into).collect(),
            next_id: 1,
            ..Table::default()
        };
        self.tables.write().insert(table.to_owned(), table_def);
    }

    /// Marks a column as not nullable.
    pub fn require_column(&self, table: &str, column: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table_def = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        table_def.required.insert(column.to_owned());
        Ok(())
    }

    /// Makes every write to `table` fail, to simulate a locked table.
    pub fn set_read_only(&self, table: &str, read_only: bool) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table_def = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        table_def.read_only = read_only;
        Ok(())
    }

    /// Returns every row of `table` in primary key order.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<LocalRecord>> {
        let tables = self.tables.read();
        let table_def = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        Ok(table_def.rows.values().cloned().collect())
    }

    /// Returns the number of rows in `table` (zero for unknown tables).
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Inserts a row as a user of the database would.
    pub fn insert_external(&self, table: &str, columns: Attributes) -> StoreResult<LocalRecord> {
        self.insert(table, columns, WriteOrigin::External)
    }

    /// Updates a row as a user of the database would.
    pub fn update_external(
        &self,
        table: &str,
        id: i64,
        columns: Attributes,
    ) -> StoreResult<LocalRecord> {
        self.update(table, id, columns, WriteOrigin::External)
    }

    fn stamp(&self, record: &mut LocalRecord, origin: WriteOrigin) {
        let now = self.clock.now();
        record.updated_at = now;
        if origin == WriteOrigin::Engine {
            record.synchronized_at = Some(now);
        }
    }

    fn writable<'a>(
        tables: &'a mut BTreeMap<String, Table>,
        table: &str,
    ) -> StoreResult<&'a mut Table> {
        let table_def = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        if table_def.read_only {
            return Err(StoreError::validation(format!("{table} is read only")));
        }
        Ok(table_def)
    }
}

impl LocalStore for InMemoryDatabase {
    fn columns(&self, table: &str) -> StoreResult<Vec<String>> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))
    }

    fn find(&self, table: &str, id: i64) -> StoreResult<Option<LocalRecord>> {
        let tables = self.tables.read();
        let table_def = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        Ok(table_def.rows.get(&id).cloned())
    }

    fn find_by(&self, table: &str, column: &str, value: &Value) -> StoreResult<Option<LocalRecord>> {
        let tables = self.tables.read();
        let table_def = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        Ok(table_def
            .rows
            .values()
            .find(|row| row.columns.get(column).unwrap_or(&Value::Null) == value)
            .cloned())
    }

    fn changed_between(
        &self,
        table: &str,
        after: Option<Timestamp>,
        before: Timestamp,
    ) -> StoreResult<Vec<LocalRecord>> {
        let tables = self.tables.read();
        let table_def = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        Ok(table_def
            .rows
            .values()
            .filter(|row| after.map_or(true, |after| row.updated_at > after))
            .filter(|row| row.updated_at <= before)
            .cloned()
            .collect())
    }

    fn insert(
        &self,
        table: &str,
        columns: Attributes,
        origin: WriteOrigin,
    ) -> StoreResult<LocalRecord> {
        let mut tables = self.tables.write();
        let table_def = Self::writable(&mut tables, table)?;
        table_def.check_columns(table, &columns)?;

        let mut record = LocalRecord {
            id: table_def.next_id,
            columns,
            updated_at: Timestamp::EPOCH,
            synchronized_at: None,
        };
        table_def.check_required(&record)?;
        self.stamp(&mut record, origin);

        table_def.next_id += 1;
        table_def.rows.insert(record.id, record.clone());
        Ok(record)
    }

    fn update(
        &self,
        table: &str,
        id: i64,
        columns: Attributes,
        origin: WriteOrigin,
    ) -> StoreResult<LocalRecord> {
        let mut tables = self.tables.write();
        let table_def = Self::writable(&mut tables, table)?;
        table_def.check_columns(table, &columns)?;

        let mut record = table_def
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::RowNotFound {
                table: table.to_owned(),
                id,
            })?;
        record.columns.extend(columns);
        table_def.check_required(&record)?;
        self.stamp(&mut record, origin);

        table_def.rows.insert(id, record.clone());
        Ok(record)
    }

    fn delete_where_in(&self, table: &str, column: &str, values: &[Value]) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let table_def = Self::writable(&mut tables, table)?;
        let before = table_def.rows.len();
        table_def.rows.retain(|_, row| {
            let value = row.columns.get(column).unwrap_or(&Value::Null);
            value.is_null() || !values.contains(value)
        });
        Ok(before - table_def.rows.len())
    }
}
