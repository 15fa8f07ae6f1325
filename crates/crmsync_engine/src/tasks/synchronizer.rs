//! Writing resolved attribute values to both sides of a linked pair.

use super::{record_failed, Task, TaskStats};
use crate::accumulator::{AccumulatedChanges, Accumulator, ChangeKey};
use crate::error::SyncResult;
use crate::instance::Instance;
use crate::runner::Scope;
use tracing::{debug, error, trace};

/// Writes the resolved state of each accumulated record to whichever side
/// differs from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronizer;

impl Synchronizer {
    /// Brings one side in line with the accumulator. Returns true if it wrote.
    fn apply(
        scope: &mut Scope<'_>,
        instance: &mut dyn Instance,
        accumulator: &Accumulator,
    ) -> SyncResult<bool> {
        let diff = accumulator.diff(&instance.attributes());
        if diff.is_empty() {
            return Ok(false);
        }
        trace!(key = %instance.key(), attributes = ?diff.keys().collect::<Vec<_>>(), "applying");
        instance.update(&diff)?;
        scope.cache_timestamp(&*instance);
        Ok(true)
    }

    /// An instance written after the newest accumulated change holds
    /// attributes the accumulator has not seen. Engine writes are exempt.
    fn up_to_date(instance: &dyn Instance, accumulator: &Accumulator) -> bool {
        instance.updated_internally() || accumulator.up_to_date_for(instance.last_update())
    }
}

impl Task for Synchronizer {
    fn name(&self) -> &'static str {
        "synchronize"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();
        let pending: Vec<(ChangeKey, Accumulator)> = changes
            .for_remote_type(scope.mapping().remote_type())
            .map(|(key, accumulator)| (key.clone(), accumulator.clone()))
            .collect();

        for (key, accumulator) in pending {
            stats.processed += 1;
            let local = scope.local_type().find(&key.remote_id);
            let remote = scope.remote_type().find(&key.remote_id);
            let (mut local, mut remote) = match (local, remote) {
                (Ok(Some(local)), Ok(Some(remote))) => (local, remote),
                (Ok(_), Ok(_)) => {
                    debug!(remote_id = %key.remote_id, "counterpart gone; skipping");
                    continue;
                }
                (Err(err), _) | (_, Err(err)) => {
                    error!(
                        task = self.name(),
                        local_type = scope.mapping().local_type(),
                        remote_type = scope.mapping().remote_type(),
                        remote_id = %key.remote_id,
                        error = %err,
                        "record failed"
                    );
                    stats.failed += 1;
                    continue;
                }
            };

            if !Self::up_to_date(&local, &accumulator) || !Self::up_to_date(&remote, &accumulator)
            {
                debug!(
                    remote_id = %key.remote_id,
                    "record changed since collection; deferring"
                );
                continue;
            }

            match Self::apply(scope, &mut local, &accumulator) {
                Ok(true) => stats.updated += 1,
                Ok(false) => {}
                Err(err) => record_failed(self.name(), &local, err, &mut stats),
            }
            match Self::apply(scope, &mut remote, &accumulator) {
                Ok(true) => stats.updated += 1,
                Ok(false) => {}
                Err(err) => record_failed(self.name(), &remote, err, &mut stats),
            }
        }
        Ok(stats)
    }
}
