//! Runs the tasks of a cycle over every registered mapping.

use crate::accumulator::AccumulatedChanges;
use crate::error::SyncResult;
use crate::mapping::{Mapping, Registry};
use crate::runner::{Runner, Window};
use crate::tasks::{
    Associator, Attacher, Cleaner, Collector, Initializer, Synchronizer, Task, TaskStats,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// What one task did for one mapping.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Task name.
    pub task: &'static str,
    /// Local table of the mapping.
    pub local_type: String,
    /// Remote object type of the mapping.
    pub remote_type: String,
    /// Wall time spent.
    pub elapsed: Duration,
    /// Statistics, or the error that stopped the task.
    pub result: Result<TaskStats, String>,
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Window the cycle ran over.
    pub window: Window,
    /// Every task run, in order.
    pub outcomes: Vec<TaskOutcome>,
    /// Wall time of the cycle.
    pub elapsed: Duration,
}

impl CycleReport {
    /// Sums the statistics of every task that ran to completion.
    pub fn totals(&self) -> TaskStats {
        let mut totals = TaskStats::default();
        for stats in self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()) {
            totals += *stats;
        }
        totals
    }

    /// Total writes to either store.
    pub fn writes(&self) -> usize {
        self.totals().writes()
    }

    /// Tasks that could not run.
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Orders the tasks of a cycle.
///
/// Cleaning, attaching, initializing and collecting run for every mapping
/// before any association or attribute is reconciled, so pass two sees the
/// full set of links and changes.
pub struct TaskManager {
    first_pass: Vec<Box<dyn Task>>,
    second_pass: Vec<Box<dyn Task>>,
}

impl TaskManager {
    /// Creates a manager after checking the registry's cross references.
    pub fn new(registry: &Registry) -> SyncResult<Self> {
        registry.validate()?;
        Ok(Self {
            first_pass: vec![
                Box::new(Cleaner),
                Box::new(Attacher),
                Box::new(Initializer),
                Box::new(Collector),
            ],
            second_pass: vec![Box::new(Associator), Box::new(Synchronizer)],
        })
    }

    /// Runs one cycle over the runner's current window.
    ///
    /// Task failures are logged and reported; they never stop the cycle.
    pub fn perform(&self, runner: &mut Runner) -> CycleReport {
        let started = Instant::now();
        let window = runner.window();
        let mappings: Vec<Arc<Mapping>> = runner.registry().iter().cloned().collect();
        let mut changes = AccumulatedChanges::new();
        let mut outcomes = Vec::new();

        for pass in [&self.first_pass, &self.second_pass] {
            for mapping in &mappings {
                for task in pass {
                    outcomes.push(Self::run_task(
                        task.as_ref(),
                        runner,
                        mapping,
                        &mut changes,
                    ));
                }
            }
        }

        let report = CycleReport {
            window,
            outcomes,
            elapsed: started.elapsed(),
        };
        let totals = report.totals();
        info!(
            created = totals.created,
            updated = totals.updated,
            deleted = totals.deleted,
            failed = totals.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "cycle complete"
        );
        report
    }

    fn run_task(
        task: &dyn Task,
        runner: &mut Runner,
        mapping: &Arc<Mapping>,
        changes: &mut AccumulatedChanges,
    ) -> TaskOutcome {
        let started = Instant::now();
        let result = runner.run(mapping, |scope| task.perform(scope, changes));
        let elapsed = started.elapsed();

        let result = match result {
            Ok(stats) => {
                info!(
                    task = task.name(),
                    local_type = mapping.local_type(),
                    remote_type = mapping.remote_type(),
                    processed = stats.processed,
                    writes = stats.writes(),
                    failed = stats.failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task finished"
                );
                Ok(stats)
            }
            Err(err) => {
                error!(
                    task = task.name(),
                    local_type = mapping.local_type(),
                    remote_type = mapping.remote_type(),
                    error = %err,
                    "task failed"
                );
                Err(err.to_string())
            }
        };

        TaskOutcome {
            task: task.name(),
            local_type: mapping.local_type().to_owned(),
            remote_type: mapping.remote_type().to_owned(),
            elapsed,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::record_type::Backends;
    use crate::tasks::testing::{attrs, fixture};
    use serde_json::json;

    #[test]
    fn runs_both_passes_in_order() {
        let mut f = fixture();
        let manager = TaskManager::new(f.runner.registry()).unwrap();
        f.advance();
        f.runner.tick();

        let report = manager.perform(&mut f.runner);

        let order: Vec<_> = report
            .outcomes
            .iter()
            .map(|o| (o.task, o.local_type.as_str()))
            .collect();
        assert_eq!(
            order,
            [
                ("clean", "accounts"),
                ("attach", "accounts"),
                ("initialize", "accounts"),
                ("collect", "accounts"),
                ("clean", "contacts"),
                ("attach", "contacts"),
                ("initialize", "contacts"),
                ("collect", "contacts"),
                ("associate", "accounts"),
                ("synchronize", "accounts"),
                ("associate", "contacts"),
                ("synchronize", "contacts"),
            ]
        );
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn failing_task_does_not_stop_the_cycle() {
        let f = fixture();
        f.db.define_table("leads", ["name", "lead_remote_id"]);
        let mut registry = Registry::clone(f.runner.registry());
        registry.insert(Mapping::builder("leads", "Lead").build(f.db.as_ref()).unwrap());
        let manager = TaskManager::new(&registry).unwrap();
        let mut runner = Runner::new(
            Arc::new(registry),
            Backends::new(f.db.clone(), f.remote.clone()),
            f.clock.clone(),
            &EngineConfig::new(),
        );
        f.remote
            .insert_external("Account", attrs(json!({ "Name": "Acme" })))
            .unwrap();
        f.advance();
        runner.tick();

        let report = manager.perform(&mut runner);

        assert!(report.failures().all(|o| o.local_type == "leads"));
        assert!(report.failures().count() >= 1);
        assert_eq!(report.outcomes.len(), 18);
        assert_eq!(f.db.count("accounts"), 1);
    }

    #[test]
    fn record_failures_are_counted() {
        let mut f = fixture();
        let manager = TaskManager::new(f.runner.registry()).unwrap();
        f.db
            .insert_external("accounts", attrs(json!({ "name": "Acme" })))
            .unwrap();
        f.db
            .insert_external("contacts", attrs(json!({ "name": "Doe" })))
            .unwrap();
        f.remote.set_read_only("Account", true).unwrap();
        f.advance();
        f.runner.tick();

        let report = manager.perform(&mut f.runner);

        assert_eq!(report.totals().failed, 1);
        assert_eq!(report.totals().created, 1);
        assert_eq!(f.remote.count("Account"), 0);
        assert_eq!(f.remote.count("Contact"), 1);
    }
}
