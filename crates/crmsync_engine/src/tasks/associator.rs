//! Reconciling `BelongsTo` links between linked pairs.

use super::{record_failed, Task, TaskStats};
use crate::accumulator::AccumulatedChanges;
use crate::error::SyncResult;
use crate::instance::{Instance, LocalInstance, RemoteInstance};
use crate::mapping::{Association, AssociationKind};
use crate::runner::Scope;
use crmsync_store::Attributes;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Keeps `BelongsTo` links consistent between linked pairs.
///
/// The local side expresses the link as a foreign key to another local row,
/// the remote side as a lookup field holding a remote id. When the two point
/// at different records, the side written last wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Associator;

impl Associator {
    /// Returns the number of writes made to the pair.
    fn reconcile(
        scope: &mut Scope<'_>,
        local: &mut LocalInstance,
        remote: &mut RemoteInstance,
        associations: &[Association],
    ) -> SyncResult<usize> {
        let mut writes = 0;
        for association in associations {
            let local_view = scope
                .links()
                .remote_id_via(association, local.record())?;
            let remote_view = association.lookup_value(&remote.record().fields);
            if local_view == remote_view {
                continue;
            }

            if local.last_update() >= remote.last_update() {
                let Some(lookup) = association.writable_lookups().next() else {
                    continue;
                };
                debug!(
                    association = %association.name,
                    remote_id = remote.remote_id(),
                    from = ?remote_view,
                    to = ?local_view,
                    "pointing remote lookup at local parent"
                );
                let mut fields = Attributes::new();
                fields.insert(
                    lookup.to_owned(),
                    local_view.map_or(Value::Null, Value::String),
                );
                remote.write_fields(fields)?;
                scope.cache_timestamp(&*remote);
            } else {
                let target_id = match remote_view {
                    None => Value::Null,
                    Some(ref remote_id) => {
                        let target = scope.registry().target_of(association)?;
                        match scope.links().local_row(target, remote_id)? {
                            Some(row) => Value::from(row.id),
                            // Parent not mirrored yet; a later cycle picks it up.
                            None => continue,
                        }
                    }
                };
                debug!(
                    association = %association.name,
                    local_id = local.local_id(),
                    to = ?remote_view,
                    "pointing local foreign key at remote parent"
                );
                let mut columns = Attributes::new();
                columns.insert(association.foreign_key.clone(), target_id);
                local.write_columns(columns)?;
                scope.cache_timestamp(&*local);
            }
            writes += 1;
        }
        Ok(writes)
    }

    fn pair_for_local(
        scope: &Scope<'_>,
        local: &LocalInstance,
    ) -> SyncResult<Option<(LocalInstance, RemoteInstance)>> {
        let Some(remote_id) = local.id() else {
            return Ok(None);
        };
        Ok(scope
            .remote_type()
            .find(remote_id)?
            .map(|remote| (local.clone(), remote)))
    }

    fn pair_for_remote(
        scope: &Scope<'_>,
        remote: &RemoteInstance,
    ) -> SyncResult<Option<(LocalInstance, RemoteInstance)>> {
        Ok(scope
            .local_type()
            .find(remote.remote_id())?
            .map(|local| (local, remote.clone())))
    }
}

impl Task for Associator {
    fn name(&self) -> &'static str {
        "associate"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        _changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();
        let associations: Vec<Association> = scope
            .mapping()
            .associations()
            .iter()
            .filter(|association| association.kind == AssociationKind::BelongsTo)
            .cloned()
            .collect();
        if associations.is_empty() {
            return Ok(stats);
        }

        let mut seen = HashSet::new();
        let locals = scope.local_instances()?;
        let remotes = scope.remote_instances()?;

        let candidates = locals
            .iter()
            .map(|local| (local as &dyn Instance, Candidate::Local(local)))
            .chain(
                remotes
                    .iter()
                    .map(|remote| (remote as &dyn Instance, Candidate::Remote(remote))),
            );

        for (instance, side) in candidates {
            if instance.updated_internally() {
                continue;
            }
            let Some(remote_id) = instance.id() else {
                continue;
            };
            if !seen.insert(remote_id.to_owned()) {
                continue;
            }
            stats.processed += 1;

            let pair = match side {
                Candidate::Local(local) => Self::pair_for_local(scope, local),
                Candidate::Remote(remote) => Self::pair_for_remote(scope, remote),
            };
            let (mut local, mut remote) = match pair {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(err) => {
                    record_failed(self.name(), instance, err, &mut stats);
                    continue;
                }
            };

            match Self::reconcile(scope, &mut local, &mut remote, &associations) {
                Ok(writes) => stats.updated += writes,
                Err(err) => record_failed(self.name(), instance, err, &mut stats),
            }
        }
        Ok(stats)
    }
}

enum Candidate<'a> {
    Local(&'a LocalInstance),
    Remote(&'a RemoteInstance),
}
