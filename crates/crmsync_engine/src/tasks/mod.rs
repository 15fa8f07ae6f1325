//! The six stages of a cycle.
//!
//! Each task works on one mapping at a time through a runner [`Scope`].
//! Record-level failures are logged and counted in [`TaskStats`]; only
//! failures that prevent the task from running at all (e.g. a query that
//! cannot be made) are returned as errors.

mod associator;
mod attacher;
mod cleaner;
mod collector;
mod initializer;
mod synchronizer;

pub use associator::Associator;
pub use attacher::Attacher;
pub use cleaner::Cleaner;
pub use collector::Collector;
pub use initializer::Initializer;
pub use synchronizer::Synchronizer;

use crate::accumulator::AccumulatedChanges;
use crate::error::{SyncError, SyncResult};
use crate::instance::Instance;
use crate::runner::Scope;
use std::ops::AddAssign;
use tracing::error;

/// One stage of the pipeline.
pub trait Task: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Runs the task for the scope's mapping.
    fn perform(
        &self,
        scope: &mut Scope<'_>,
        changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats>;
}

/// What a task did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Records examined.
    pub processed: usize,
    /// Records created.
    pub created: usize,
    /// Records updated.
    pub updated: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Changesets accumulated.
    pub collected: usize,
    /// Records that failed.
    pub failed: usize,
}

impl TaskStats {
    /// Total writes to either store.
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for TaskStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.collected += other.collected;
        self.failed += other.failed;
    }
}

/// Logs a record-level failure with the record's identity.
fn record_failed(task: &str, instance: &dyn Instance, err: SyncError, stats: &mut TaskStats) {
    let err = SyncError::for_record(instance, err);
    let key = instance.key();
    error!(
        task,
        local_type = instance.mapping().local_type(),
        remote_type = instance.mapping().remote_type(),
        record_type = %key.record_type,
        record_id = %key.id,
        error = %err,
        "record failed"
    );
    stats.failed += 1;
}
