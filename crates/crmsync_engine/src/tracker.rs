//! Persistence of the last completed cycle.

use crate::error::SyncResult;
use crmsync_store::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Remembers when the last successful cycle started, so a restarted worker
/// resumes its window instead of rescanning everything.
pub trait Tracker: Send + Sync {
    /// Start of the last completed cycle, if any.
    fn last_run(&self) -> SyncResult<Option<Timestamp>>;

    /// Records the start of a completed cycle.
    fn track(&self, last_run: Timestamp) -> SyncResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackerFile {
    last_run: Timestamp,
}

/// Keeps the timestamp in a small JSON file.
#[derive(Debug, Clone)]
pub struct FileTracker {
    path: PathBuf,
}

impl FileTracker {
    /// Creates a tracker backed by `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracker for FileTracker {
    fn last_run(&self) -> SyncResult<Option<Timestamp>> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: TrackerFile = serde_json::from_slice(&contents)?;
        Ok(Some(file.last_run))
    }

    fn track(&self, last_run: Timestamp) -> SyncResult<()> {
        let contents = serde_json::to_vec(&TrackerFile { last_run })?;
        // Write-then-rename so a crash never leaves a truncated file.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, contents)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// Keeps the timestamp in memory.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    last_run: Mutex<Option<Timestamp>>,
}

impl MemoryTracker {
    /// Creates a tracker with no recorded cycle.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracker for MemoryTracker {
    fn last_run(&self) -> SyncResult<Option<Timestamp>> {
        Ok(*self.last_run.lock())
    }

    fn track(&self, last_run: Timestamp) -> SyncResult<()> {
        *self.last_run.lock() = Some(last_run);
        Ok(())
    }
}
