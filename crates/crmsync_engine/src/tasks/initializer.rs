//! Creating missing counterparts on either side.

use super::{record_failed, Task, TaskStats};
use crate::accumulator::AccumulatedChanges;
use crate::associations::BuildCache;
use crate::error::SyncResult;
use crate::instance::Instance;
use crate::record_type::LocalRecordType;
use crate::runner::Scope;
use tracing::debug;

/// Creates counterparts for records that exist on one side only.
///
/// Remote records are mirrored locally when the mapping's strategy allows
/// it, together with their associated records. Local rows are always pushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Initializer;

impl Initializer {
    fn build_local(scope: &mut Scope<'_>, stats: &mut TaskStats) -> SyncResult<()> {
        let instances = scope.remote_instances()?;
        let mut cache = BuildCache::new();

        for instance in instances.iter() {
            stats.processed += 1;
            let should_build = scope
                .links()
                .is_synced(scope.mapping(), instance.remote_id())
                .and_then(|synced| {
                    if synced {
                        Ok(false)
                    } else {
                        scope
                            .mapping()
                            .strategy()
                            .should_build(instance, &scope.links())
                    }
                });
            match should_build {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    record_failed("initialize", instance, err, stats);
                    continue;
                }
            }

            let built = scope.local_type().create(instance, &mut cache);
            match built {
                Ok((root, outcome)) => {
                    debug!(
                        local_type = scope.mapping().local_type(),
                        local_id = root.local_id(),
                        remote_id = instance.remote_id(),
                        created = outcome.created.len(),
                        "mirrored remote record"
                    );
                    stats.created += outcome.created.len();
                    stats.updated += outcome.updated.len();
                    for (mapping, record) in outcome.created.into_iter().chain(outcome.updated) {
                        let persisted =
                            LocalRecordType::new(&mapping, scope.backends(), scope.registry())
                                .instance(record);
                        scope.cache_timestamp(&persisted);
                    }
                    scope.cache_timestamp(instance);
                }
                Err(err) => record_failed("initialize", instance, err, stats),
            }
        }
        Ok(())
    }

    fn push_remote(scope: &mut Scope<'_>, stats: &mut TaskStats) -> SyncResult<()> {
        let instances = scope.local_instances()?;

        for instance in instances.iter() {
            stats.processed += 1;
            if instance.id().is_some() {
                continue;
            }
            // The Attacher may have linked the row since the collection was read.
            let mut local = match scope.local_type().find_by_id(instance.local_id()) {
                Ok(Some(local)) if local.id().is_none() => local,
                Ok(_) => continue,
                Err(err) => {
                    record_failed("initialize", instance, err, stats);
                    continue;
                }
            };
            let created = scope.remote_type().create(&mut local);
            match created {
                Ok(remote) => {
                    debug!(
                        local_type = scope.mapping().local_type(),
                        local_id = local.local_id(),
                        remote_id = remote.remote_id(),
                        "pushed local record"
                    );
                    stats.created += 1;
                    scope.cache_timestamp(&local);
                    scope.cache_timestamp(&remote);
                }
                Err(err) => record_failed("initialize", &local, err, stats),
            }
        }
        Ok(())
    }
}

impl Task for Initializer {
    fn name(&self) -> &'static str {
        "initialize"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        _changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();
        // Read before mirroring so rows mirrored below are not pushed back.
        scope.local_instances()?;
        Self::build_local(scope, &mut stats)?;
        Self::push_remote(scope, &mut stats)?;
        Ok(stats)
    }
}
