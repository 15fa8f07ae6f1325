//! Inspect command implementation.

use crate::error::CliError;
use crate::state::StateFile;
use serde::Serialize;
use std::path::Path;

/// State file inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// State file path.
    pub path: String,
    /// Id of the user the engine writes to the remote store as.
    pub engine_user: String,
    /// Local tables.
    pub tables: Vec<TableStats>,
    /// Remote object types.
    pub objects: Vec<ObjectStats>,
}

/// Statistics for a single local table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of rows.
    pub rows: usize,
    /// Rows holding a remote id in a lookup column.
    pub linked: usize,
    /// Rows whose last write was made by the engine.
    pub synchronized: usize,
}

/// Statistics for a single remote object type.
#[derive(Debug, Serialize)]
pub struct ObjectStats {
    /// Object type name.
    pub name: String,
    /// Number of live records.
    pub records: usize,
    /// Records last modified by the engine.
    pub engine_writes: usize,
    /// Entries in the deletion log.
    pub deleted: usize,
}

fn is_lookup_column(column: &str) -> bool {
    column.ends_with("_remote_id")
}

impl InspectResult {
    /// Summarizes a loaded state file.
    pub fn summarize(path: &Path, state: &StateFile) -> Self {
        let tables = state
            .local
            .tables
            .iter()
            .map(|(name, table)| TableStats {
                name: name.clone(),
                rows: table.rows.len(),
                linked: table
                    .rows
                    .iter()
                    .filter(|row| {
                        table
                            .columns
                            .iter()
                            .any(|c| is_lookup_column(c) && row.get(c).is_some())
                    })
                    .count(),
                synchronized: table.rows.iter().filter(|row| row.synchronized()).count(),
            })
            .collect();

        let user_id = &state.remote.user_id;
        let objects = state
            .remote
            .objects
            .iter()
            .map(|(name, object)| ObjectStats {
                name: name.clone(),
                records: object.records.len(),
                engine_writes: object
                    .records
                    .iter()
                    .filter(|record| &record.last_modified_by == user_id)
                    .count(),
                deleted: object.deleted.len(),
            })
            .collect();

        Self {
            path: path.display().to_string(),
            engine_user: user_id.clone(),
            tables,
            objects,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let state = StateFile::load(path)?;
    let result = InspectResult::summarize(path, &state);

    match format {
        "json" => {
            let json =
                serde_json::to_string_pretty(&result).map_err(|e| CliError::json(path, e))?;
            println!("{json}");
        }
        "text" => print_text_output(&result),
        other => return Err(CliError::UnknownFormat(other.to_owned())),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("State: {}", result.path);
    println!("Engine user: {}", result.engine_user);
    println!();
    println!("Local tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        println!(
            "  {:<24} {:>6} rows  {:>6} linked  {:>6} synchronized",
            table.name, table.rows, table.linked, table.synchronized
        );
    }
    println!();
    println!("Remote objects:");
    if result.objects.is_empty() {
        println!("  (none)");
    }
    for object in &result.objects {
        println!(
            "  {:<24} {:>6} records  {:>6} by engine  {:>6} deleted",
            object.name, object.records, object.engine_writes, object.deleted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_store::{
        Attributes, FieldDescribe, InMemoryDatabase, InMemoryRemote, ManualClock, RemoteStore,
        Timestamp,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn state() -> StateFile {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let db = InMemoryDatabase::new(clock.clone());
        db.define_table("accounts", ["name", "account_remote_id"]);
        let mut linked = Attributes::new();
        linked.insert("name".into(), json!("Acme"));
        linked.insert("account_remote_id".into(), json!("001A"));
        db.insert_external("accounts", linked).unwrap();
        db.insert_external("accounts", Attributes::new()).unwrap();

        let remote = InMemoryRemote::new(clock, "005ENGINE");
        remote.define_object("Account", vec![FieldDescribe::writable("Name")]);
        remote
            .upsert("Account", "Name", "Acme", Attributes::new())
            .unwrap();
        let gone = remote.insert_external("Account", Attributes::new()).unwrap();
        remote.delete_external("Account", &gone).unwrap();

        StateFile::capture(&db, &remote)
    }

    #[test]
    fn summarizes_both_stores() {
        let result = InspectResult::summarize(Path::new("state.json"), &state());

        assert_eq!(result.engine_user, "005ENGINE");
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].rows, 2);
        assert_eq!(result.tables[0].linked, 1);
        assert_eq!(result.tables[0].synchronized, 0);
        assert_eq!(result.objects[0].records, 1);
        assert_eq!(result.objects[0].engine_writes, 1);
        assert_eq!(result.objects[0].deleted, 1);
    }

    #[test]
    fn rejects_unknown_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        state().save(&path).unwrap();

        assert!(run(&path, "json").is_ok());
        let err = run(&path, "yaml").unwrap_err();
        assert!(matches!(err, CliError::UnknownFormat(f) if f == "yaml"));
    }
}
