//! File-backed state: both stores serialized into one JSON document.

use crate::error::CliError;
use crmsync_store::{Clock, DatabaseSnapshot, InMemoryDatabase, InMemoryRemote, RemoteSnapshot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Contents of a state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// The local database.
    #[serde(default)]
    pub local: DatabaseSnapshot,
    /// The remote store.
    #[serde(default)]
    pub remote: RemoteSnapshot,
}

impl StateFile {
    /// Reads a state file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = fs::read(path).map_err(|e| CliError::io(path, e))?;
        serde_json::from_slice(&contents).map_err(|e| CliError::json(path, e))
    }

    /// Writes the state file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let contents = serde_json::to_vec_pretty(self).map_err(|e| CliError::json(path, e))?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, contents).map_err(|e| CliError::io(&staging, e))?;
        fs::rename(&staging, path).map_err(|e| CliError::io(path, e))
    }

    /// Restores both stores.
    pub fn open(self, clock: Arc<dyn Clock>) -> (Arc<InMemoryDatabase>, Arc<InMemoryRemote>) {
        let db = InMemoryDatabase::from_snapshot(clock.clone(), self.local);
        let remote = InMemoryRemote::from_snapshot(clock, self.remote);
        (Arc::new(db), Arc::new(remote))
    }

    /// Captures both stores.
    pub fn capture(db: &InMemoryDatabase, remote: &InMemoryRemote) -> Self {
        Self {
            local: db.snapshot(),
            remote: remote.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_store::{Attributes, FieldDescribe, ManualClock, Timestamp};
    use tempfile::tempdir;

    #[test]
    fn save_and_load() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let db = InMemoryDatabase::new(clock.clone());
        db.define_table("accounts", ["name", "account_remote_id"]);
        db.insert_external("accounts", Attributes::new()).unwrap();
        let remote = InMemoryRemote::new(clock, "005ENGINE");
        remote.define_object("Account", vec![FieldDescribe::writable("Name")]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = StateFile::capture(&db, &remote);
        state.save(&path).unwrap();

        assert_eq!(StateFile::load(&path).unwrap(), state);
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let err = StateFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
