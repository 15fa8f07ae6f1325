//! Removing local rows whose remote record is gone or out of scope.

use super::{Task, TaskStats};
use crate::accumulator::AccumulatedChanges;
use crate::error::SyncResult;
use crate::runner::Scope;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Deletes local rows whose remote record was deleted or left the mapping's
/// scope.
///
/// Passive mappings are never cleaned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cleaner;

impl Task for Cleaner {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn perform(
        &self,
        scope: &mut Scope<'_>,
        _changes: &mut AccumulatedChanges,
    ) -> SyncResult<TaskStats> {
        let mut stats = TaskStats::default();
        if scope.mapping().strategy().is_passive() {
            return Ok(stats);
        }

        let window = scope.window();
        let mut dropped = BTreeSet::new();

        if let Some(after) = window.after {
            dropped.extend(scope.remote_type().deleted_between(after, window.before)?);
        }

        if !scope.mapping().conditions().is_empty() {
            let scoped: BTreeSet<String> = scope
                .remote_instances()?
                .iter()
                .map(|instance| instance.remote_id().to_owned())
                .collect();
            let unscoped = scope.unscoped_remote_instances()?;
            dropped.extend(
                unscoped
                    .iter()
                    .map(|instance| instance.remote_id())
                    .filter(|id| !scoped.contains(*id))
                    .map(str::to_owned),
            );
        }

        stats.processed = dropped.len();
        if dropped.is_empty() {
            return Ok(stats);
        }

        let ids: Vec<String> = dropped.into_iter().collect();
        debug!(local_type = scope.mapping().local_type(), ids = ?ids, "dropping local rows");
        stats.deleted = scope.local_type().destroy_all(&ids)?;
        if stats.deleted > 0 {
            info!(
                local_type = scope.mapping().local_type(),
                deleted = stats.deleted,
                "removed rows no longer in scope"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BuildStrategy;
    use crate::tasks::testing::{attrs, fixture, fixture_with};
    use serde_json::json;

    #[test]
    fn drops_rows_outside_scope() {
        let mut f = fixture();
        let mut ids = Vec::new();
        for status in ["Active", "Active", "Active", "Inactive"] {
            let id = f
                .remote
                .insert_external("Contact", attrs(json!({ "LastName": "X", "Status": status })))
                .unwrap();
            f.db.insert_external("contacts", attrs(json!({ "contact_remote_id": id.clone() })))
                .unwrap();
            ids.push(id);
        }
        f.advance();
        f.runner.tick();

        let mapping = f.mapping("contacts");
        let stats = f
            .runner
            .run(&mapping, |scope| {
                Cleaner.perform(scope, &mut AccumulatedChanges::new())
            })
            .unwrap();

        assert_eq!(stats.deleted, 1);
        let remaining: Vec<_> = f
            .db
            .rows("contacts")
            .unwrap()
            .into_iter()
            .map(|row| row.columns["contact_remote_id"].clone())
            .collect();
        assert_eq!(remaining, [json!(ids[0]), json!(ids[1]), json!(ids[2])]);
    }

    #[test]
    fn drops_rows_deleted_remotely() {
        let mut f = fixture();
        let id = f
            .remote
            .insert_external("Account", attrs(json!({ "Name": "Acme" })))
            .unwrap();
        f.db.insert_external("accounts", attrs(json!({ "account_remote_id": id.clone() })))
            .unwrap();
        f.advance();
        f.runner.tick();

        f.advance();
        f.remote.delete_external("Account", &id).unwrap();
        f.advance();
        f.runner.tick();

        let mapping = f.mapping("accounts");
        let stats = f
            .runner
            .run(&mapping, |scope| {
                Cleaner.perform(scope, &mut AccumulatedChanges::new())
            })
            .unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(f.db.count("accounts"), 0);
    }

    #[test]
    fn first_cycle_skips_deletion_log() {
        let mut f = fixture();
        let id = f
            .remote
            .insert_external("Account", attrs(json!({ "Name": "Acme" })))
            .unwrap();
        f.db.insert_external("accounts", attrs(json!({ "account_remote_id": id.clone() })))
            .unwrap();
        f.remote.delete_external("Account", &id).unwrap();
        f.advance();
        f.runner.tick();

        let mapping = f.mapping("accounts");
        let stats = f
            .runner
            .run(&mapping, |scope| {
                Cleaner.perform(scope, &mut AccumulatedChanges::new())
            })
            .unwrap();
        assert_eq!(stats, TaskStats::default());
        assert_eq!(f.db.count("accounts"), 1);
    }

    #[test]
    fn passive_mappings_are_left_alone() {
        let mut f = fixture_with(BuildStrategy::Passive);
        let id = f
            .remote
            .insert_external("Contact", attrs(json!({ "Status": "Inactive" })))
            .unwrap();
        f.db.insert_external("contacts", attrs(json!({ "contact_remote_id": id })))
            .unwrap();
        f.advance();
        f.runner.tick();

        let mapping = f.mapping("contacts");
        f.runner
            .run(&mapping, |scope| {
                Cleaner.perform(scope, &mut AccumulatedChanges::new())
            })
            .unwrap();
        assert_eq!(f.db.count("contacts"), 1);
    }
}
