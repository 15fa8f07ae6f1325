//! Recovering links left by interrupted remote creates.

use super::{record_failed, Task, TaskStats};
use crate::accumulator::AccumulatedChanges;
use crate::error::SyncResult;
use crate::instance::{Instance, RemoteInstance};
use crate::runner::Scope;
use tracing::{debug, warn};

/// Links remote records created by an interrupted upsert to their local row.
///
/// An engine create writes the correlation token `<local type>::<local id>`
/// on the remote record before the local row learns the remote id. If the
/// cycle dies in between, the token is all that connects the two.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attacher;

enum Resolution {
    /// Token names another local type.
    Foreign,
    /// Already linked; only the token remains.
    Linked,
    /// The local row was found and linked.
    Attached,
    /// No unlinked row with that id exists.
    Missing,
}

impl Attacher {
    fn attach(
        scope: &mut Scope<'_>,
        instance: &RemoteInstance,
        token: &str,
    ) -> SyncResult<Resolution> {
        let mapping = scope.mapping();
        let Some((local_type, local_id)) = token.split_once("::") else {
            return Ok(Resolution::Foreign);
        };
        if local_type != mapping.local_type() {
            return Ok(Resolution::Foreign);
        }
        let Ok(local_id) = local_id.parse::<i64>() else {
            warn!(token, "malformed synchronization token");
            return Ok(Resolution::Foreign);
        };

        if scope.links().is_synced(mapping, instance.remote_id())? {
            return Ok(Resolution::Linked);
        }

        let row = scope.local_type().find_by_id(local_id)?;
        match row {
            Some(mut row) if row.id().is_none() => {
                row.link(instance.remote_id())?;
                scope.cache_timestamp(&row);
                Ok(Resolution::Attached)
            }
            _ => Ok(Resolution::Missing),
        }
    }
}

impl Task for Attacher {
    fn name(&self) -> &'static str {
        "attach"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        _changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();
        let instances = scope.remote_instances()?;

        for instance in instances.iter() {
            let Some(token) = instance.sync_token().map(str::to_owned) else {
                continue;
            };
            stats.processed += 1;
            let mut instance = instance.clone();

            let resolution = match Self::attach(scope, &instance, &token) {
                Ok(resolution) => resolution,
                Err(err) => {
                    record_failed(self.name(), &instance, err, &mut stats);
                    continue;
                }
            };
            match resolution {
                Resolution::Foreign => continue,
                Resolution::Attached => stats.updated += 1,
                Resolution::Linked | Resolution::Missing => {}
            }
            if matches!(resolution, Resolution::Missing) {
                debug!(token = %token, remote_id = instance.remote_id(), "no row for token");
            }

            match instance.clear_sync_token() {
                Ok(()) => {
                    scope.cache_timestamp(&instance);
                    stats.updated += 1;
                }
                Err(err) => record_failed(self.name(), &instance, err, &mut stats),
            }
        }
        Ok(stats)
    }
}
