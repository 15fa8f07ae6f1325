//! Async polling loop.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::manager::{CycleReport, TaskManager};
use crate::runner::Runner;
use crate::tasks::TaskStats;
use crate::tracker::Tracker;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Statistics across the cycles of a worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Cycles completed.
    pub cycles_completed: u64,
    /// Task statistics summed over all cycles.
    pub totals: TaskStats,
}

/// Runs cycles on a schedule.
///
/// Cycles are synchronous and run on tokio's blocking pool. The runner is
/// moved into the cycle and handed back when it finishes, carrying only the
/// timestamp generations the next cycle needs.
pub struct Worker {
    runner: Option<Runner>,
    manager: Arc<TaskManager>,
    tracker: Arc<dyn Tracker>,
    config: EngineConfig,
    stats: WorkerStats,
}

impl Worker {
    /// Creates a worker, resuming from the tracker's last recorded cycle.
    pub fn new(
        runner: Runner,
        manager: TaskManager,
        tracker: Arc<dyn Tracker>,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let last_run = tracker.last_run()?;
        if let Some(last_run) = last_run {
            info!(%last_run, "resuming after last recorded cycle");
        }
        Ok(Self {
            runner: Some(runner.with_last_run(last_run)),
            manager: Arc::new(manager),
            tracker,
            config,
            stats: WorkerStats::default(),
        })
    }

    /// Statistics so far.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// The runner, unless a cycle failed fatally.
    pub fn runner(&self) -> Option<&Runner> {
        self.runner.as_ref()
    }

    /// Runs a single cycle and records it with the tracker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Worker`] if the cycle panicked. The runner is lost
    /// with it, so every later call fails as well.
    pub async fn run_once(&mut self) -> SyncResult<CycleReport> {
        let mut runner = self
            .runner
            .take()
            .ok_or_else(|| SyncError::Worker("runner lost in an earlier cycle".into()))?;
        let manager = Arc::clone(&self.manager);

        let (runner, report) = tokio::task::spawn_blocking(move || {
            runner.tick();
            let report = manager.perform(&mut runner);
            runner.release_records();
            (runner, report)
        })
        .await
        .map_err(|err| {
            error!(error = %err, "cycle aborted");
            SyncError::Worker(err.to_string())
        })?;

        if let Some(last_run) = runner.last_run() {
            self.tracker.track(last_run)?;
        }
        self.runner = Some(runner);
        self.stats.cycles_completed += 1;
        self.stats.totals += report.totals();
        Ok(report)
    }

    /// Runs cycles every `interval` until `shutdown` turns true or its sender
    /// is dropped. Runs exactly one cycle when the config says so.
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SyncResult<WorkerStats> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            let report = self.run_once().await?;
            debug!(
                cycle = self.stats.cycles_completed,
                writes = report.writes(),
                "cycle finished"
            );
            if self.config.run_once {
                break;
            }

            let pause = self.config.interval.saturating_sub(started.elapsed());
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(cycles = self.stats.cycles_completed, "worker stopped");
        Ok(self.stats)
    }
}
