//! Run command implementation.

use crate::error::CliError;
use crate::manifest::Manifest;
use crate::state::StateFile;
use crmsync_engine::{
    Backends, EngineConfig, FileTracker, MemoryTracker, Runner, TaskManager, Tracker, Worker,
    WorkerStats,
};
use crmsync_store::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Options of the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// State file holding both stores.
    pub state: PathBuf,
    /// Mapping manifest.
    pub mappings: PathBuf,
    /// Stop after one cycle.
    pub once: bool,
    /// Time between the starts of two cycles.
    pub interval: Duration,
    /// How far the query window trails the clock.
    pub delay: Duration,
    /// File recording the last completed cycle.
    pub tracker: Option<PathBuf>,
}

impl RunOptions {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::new()
            .with_interval(self.interval)
            .with_delay(self.delay);
        if let Some(path) = &self.tracker {
            config = config.with_tracker_path(path);
        }
        if self.once {
            config = config.once();
        }
        config
    }
}

/// Runs the run command.
///
/// Both stores are loaded from the state file, reconciled until the worker
/// stops, and written back. The state is saved even if the worker fails.
pub fn run(options: &RunOptions) -> Result<(), CliError> {
    let config = options.config();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (db, remote) = StateFile::load(&options.state)?.open(Arc::clone(&clock));

    let registry = Manifest::load(&options.mappings)?.registry(db.as_ref())?;
    info!(mappings = registry.len(), "loaded mappings");
    let manager = TaskManager::new(&registry)?;

    let tracker: Arc<dyn Tracker> = match &config.tracker_path {
        Some(path) => Arc::new(FileTracker::new(path)),
        None => Arc::new(MemoryTracker::new()),
    };
    let runner = Runner::new(
        Arc::new(registry),
        Backends::new(db.clone(), remote.clone()),
        clock,
        &config,
    );
    let worker = Worker::new(runner, manager, tracker, config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::io(&options.state, e))?;
    let outcome = runtime.block_on(drive(worker));

    StateFile::capture(&db, &remote).save(&options.state)?;
    let stats = outcome?;
    info!(
        cycles = stats.cycles_completed,
        created = stats.totals.created,
        updated = stats.totals.updated,
        deleted = stats.totals.deleted,
        failed = stats.totals.failed,
        "state saved"
    );
    Ok(())
}

async fn drive(worker: Worker) -> Result<WorkerStats, CliError> {
    let (shutdown, stop) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupted; stopping after the current cycle"),
            Err(err) => warn!(error = %err, "cannot listen for interrupts"),
        }
        let _ = shutdown.send(true);
    });
    Ok(worker.run(stop).await?)
}
