//! Gathering changed attributes from linked pairs.

use super::{record_failed, Task, TaskStats};
use crate::accumulator::{AccumulatedChanges, ChangeKey};
use crate::error::SyncResult;
use crate::instance::Instance;
use crate::runner::Scope;
use tracing::debug;

/// Gathers the mapped attributes of every externally changed, linked record
/// on both sides into the cycle's [`AccumulatedChanges`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Collector;

impl Collector {
    fn collect(
        scope: &Scope<'_>,
        instance: &dyn Instance,
        remote_id: &str,
        changes: &mut AccumulatedChanges,
    ) -> bool {
        if !scope.changed(instance) {
            return false;
        }
        let key = ChangeKey::new(remote_id, scope.mapping().remote_type());
        changes.store(key, instance.last_update(), instance.attributes());
        true
    }
}

impl Task for Collector {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();

        for instance in scope.local_instances()?.iter() {
            stats.processed += 1;
            let Some(remote_id) = instance.id() else {
                continue;
            };
            if Self::collect(scope, instance, remote_id, changes) {
                stats.collected += 1;
            }
        }

        for instance in scope.remote_instances()?.iter() {
            stats.processed += 1;
            match scope.links().is_synced(scope.mapping(), instance.remote_id()) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    record_failed(self.name(), instance, err, &mut stats);
                    continue;
                }
            }
            if Self::collect(scope, instance, instance.remote_id(), changes) {
                stats.collected += 1;
            }
        }

        debug!(
            local_type = scope.mapping().local_type(),
            collected = stats.collected,
            "collected changes"
        );
        Ok(stats)
    }
}
