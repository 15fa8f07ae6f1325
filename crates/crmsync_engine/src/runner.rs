//! Cycle windowing and per-cycle state.

use crate::associations::Links;
use crate::cache::{CollectionKey, RunnerCache, TimestampCache};
use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::instance::{Instance, LocalInstance, RemoteInstance, Side};
use crate::mapping::{Mapping, Registry};
use crate::record_type::{Backends, LocalRecordType, RemoteRecordType};
use crmsync_store::{Clock, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The modification window of one cycle: `after < t <= before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Exclusive lower bound; `None` on the first cycle.
    pub after: Option<Timestamp>,
    /// Inclusive upper bound.
    pub before: Timestamp,
}

impl Window {
    /// Returns true if `t` falls inside the window.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.after.map_or(true, |after| t > after) && t <= self.before
    }
}

/// Owns the state that lives across the tasks of a cycle.
///
/// `tick` starts a cycle: it moves the window forward and drops the record
/// cache, so every task of the cycle sees one snapshot of each collection.
/// Both window bounds trail the clock by `delay`, which keeps records whose
/// timestamps were assigned by a lagging clock from falling between windows.
pub struct Runner {
    registry: Arc<Registry>,
    backends: Backends,
    clock: Arc<dyn Clock>,
    delay: Duration,
    last_run: Option<Timestamp>,
    window: Window,
    timestamps: TimestampCache,
    records: RunnerCache,
}

impl Runner {
    /// Creates a runner that has not run yet.
    pub fn new(
        registry: Arc<Registry>,
        backends: Backends,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let before = clock.now().saturating_sub(config.delay);
        Self {
            registry,
            backends,
            clock,
            delay: config.delay,
            last_run: None,
            window: Window {
                after: None,
                before,
            },
            timestamps: TimestampCache::new(),
            records: RunnerCache::new(),
        }
    }

    /// Seeds the start of the previous cycle, e.g. from a tracker.
    #[must_use]
    pub fn with_last_run(mut self, last_run: Option<Timestamp>) -> Self {
        self.last_run = last_run;
        self
    }

    /// Starts a new cycle and returns its window.
    pub fn tick(&mut self) -> Window {
        let now = self.clock.now();
        self.window = Window {
            after: self.last_run.map(|last| last.saturating_sub(self.delay)),
            before: now.saturating_sub(self.delay),
        };
        self.last_run = Some(now);
        self.timestamps.reset();
        self.records.reset();
        debug!(after = ?self.window.after, before = %self.window.before, "runner ticked");
        self.window
    }

    /// The current window.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Start of the most recent cycle.
    pub fn last_run(&self) -> Option<Timestamp> {
        self.last_run
    }

    /// The registered mappings.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The stores.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// The engine's own write timestamps.
    pub fn timestamps(&self) -> &TimestampCache {
        &self.timestamps
    }

    /// Drops the cached collections, keeping only the timestamp generations.
    pub fn release_records(&mut self) {
        self.records.reset();
    }

    /// Runs `f` with a view of the runner focused on `mapping`.
    pub fn run<T>(&mut self, mapping: &Arc<Mapping>, f: impl FnOnce(&mut Scope<'_>) -> T) -> T {
        let mut scope = Scope {
            runner: self,
            mapping: Arc::clone(mapping),
        };
        f(&mut scope)
    }
}

/// The runner as seen by the tasks of one mapping.
pub struct Scope<'r> {
    runner: &'r mut Runner,
    mapping: Arc<Mapping>,
}

impl Scope<'_> {
    /// The mapping in focus.
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// The current window.
    pub fn window(&self) -> Window {
        self.runner.window
    }

    /// The registered mappings.
    pub fn registry(&self) -> &Registry {
        &self.runner.registry
    }

    /// The stores.
    pub fn backends(&self) -> &Backends {
        &self.runner.backends
    }

    /// Link lookups against the local store.
    pub fn links(&self) -> Links<'_> {
        Links::new(&self.runner.registry, self.runner.backends.local.as_ref())
    }

    /// The mapping's local table.
    pub fn local_type(&self) -> LocalRecordType<'_> {
        LocalRecordType::new(&self.mapping, &self.runner.backends, &self.runner.registry)
    }

    /// The mapping's remote object type.
    pub fn remote_type(&self) -> RemoteRecordType<'_> {
        RemoteRecordType::new(&self.mapping, &self.runner.backends, &self.runner.registry)
    }

    /// Local rows changed in the window; the same collection for the whole cycle.
    pub fn local_instances(&mut self) -> SyncResult<Arc<Vec<LocalInstance>>> {
        let key = CollectionKey::new(&self.mapping, Side::Local);
        let window = self.runner.window;
        let local_type =
            LocalRecordType::new(&self.mapping, &self.runner.backends, &self.runner.registry);
        self.runner
            .records
            .local_or_insert(key, || local_type.all(window))
    }

    /// Remote records changed in the window and in scope.
    pub fn remote_instances(&mut self) -> SyncResult<Arc<Vec<RemoteInstance>>> {
        let mapping = Arc::clone(&self.mapping);
        self.remote_instances_for(&mapping)
    }

    /// Remote records changed in the window, ignoring the mapping's conditions.
    pub fn unscoped_remote_instances(&mut self) -> SyncResult<Arc<Vec<RemoteInstance>>> {
        let unscoped = Arc::new(self.mapping.unscoped());
        self.remote_instances_for(&unscoped)
    }

    fn remote_instances_for(&mut self, mapping: &Arc<Mapping>) -> SyncResult<Arc<Vec<RemoteInstance>>> {
        let key = CollectionKey::new(mapping, Side::Remote);
        let window = self.runner.window;
        let remote_type = RemoteRecordType::new(mapping, &self.runner.backends, &self.runner.registry);
        self.runner
            .records
            .remote_or_insert(key, || remote_type.all(window))
    }

    /// Returns true unless the instance's last update is the engine's own.
    pub fn changed(&self, instance: &dyn Instance) -> bool {
        self.runner.timestamps.changed(instance)
    }

    /// Records the instance's last update as an engine write.
    pub fn cache_timestamp(&mut self, instance: &dyn Instance) {
        self.runner.timestamps.cache_timestamp(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapping;
    use crmsync_store::{
        Attributes, Condition, FieldDescribe, InMemoryDatabase, InMemoryRemote, ManualClock,
    };
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        db: Arc<InMemoryDatabase>,
        remote: Arc<InMemoryRemote>,
        runner: Runner,
        mapping: Arc<Mapping>,
    }

    fn fixture(delay: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(10_000)));
        let db = Arc::new(InMemoryDatabase::new(clock.clone()));
        db.define_table("users", ["name", "contact_remote_id"]);
        let remote = Arc::new(InMemoryRemote::new(clock.clone(), "005ENGINE"));
        remote.define_object("Contact", vec![FieldDescribe::writable("LastName")]);

        let mut registry = Registry::new();
        let mapping = registry.insert(
            Mapping::builder("users", "Contact")
                .field("name", "LastName")
                .condition(Condition::eq("LastName", "Doe"))
                .build(db.as_ref())
                .unwrap(),
        );
        let runner = Runner::new(
            Arc::new(registry),
            Backends::new(db.clone(), remote.clone()),
            clock.clone(),
            &EngineConfig::new().with_delay(delay),
        );
        Fixture {
            clock,
            db,
            remote,
            runner,
            mapping,
        }
    }

    #[test]
    fn tick_advances_window_with_delay() {
        let mut f = fixture(Duration::from_secs(2));

        let first = f.runner.tick();
        assert_eq!(first.after, None);
        assert_eq!(first.before, Timestamp::from_millis(8_000));
        assert_eq!(f.runner.last_run(), Some(Timestamp::from_millis(10_000)));

        f.clock.advance(Duration::from_secs(5));
        let second = f.runner.tick();
        assert_eq!(second.after, Some(Timestamp::from_millis(8_000)));
        assert_eq!(second.before, Timestamp::from_millis(13_000));
    }

    #[test]
    fn seeded_last_run_bounds_first_window() {
        let f = fixture(Duration::ZERO);
        let mut runner = f.runner.with_last_run(Some(Timestamp::from_millis(4_000)));
        let window = runner.tick();
        assert_eq!(window.after, Some(Timestamp::from_millis(4_000)));
        assert!(window.contains(Timestamp::from_millis(10_000)));
        assert!(!window.contains(Timestamp::from_millis(4_000)));
    }

    #[test]
    fn collections_are_stable_within_a_cycle() {
        let mut f = fixture(Duration::ZERO);
        f.db
            .insert_external("users", attrs(json!({ "name": "Ann" })))
            .unwrap();
        f.remote
            .insert_external("Contact", attrs(json!({ "LastName": "Doe" })))
            .unwrap();
        f.remote
            .insert_external("Contact", attrs(json!({ "LastName": "Roe" })))
            .unwrap();
        f.runner.tick();

        let mapping = f.mapping.clone();
        let (db, remote) = (f.db.clone(), f.remote.clone());
        f.runner.run(&mapping, |scope| {
            let locals = scope.local_instances().unwrap();
            let remotes = scope.remote_instances().unwrap();
            let unscoped = scope.unscoped_remote_instances().unwrap();
            assert_eq!(locals.len(), 1);
            assert_eq!(remotes.len(), 1);
            assert_eq!(unscoped.len(), 2);

            db.insert_external("users", Attributes::new()).unwrap();
            remote
                .insert_external("Contact", attrs(json!({ "LastName": "Doe" })))
                .unwrap();

            assert!(Arc::ptr_eq(&locals, &scope.local_instances().unwrap()));
            assert!(Arc::ptr_eq(&remotes, &scope.remote_instances().unwrap()));
            assert_eq!(scope.remote_instances().unwrap().len(), 1);
        });

        f.runner.release_records();
        f.runner.run(&mapping, |scope| {
            assert_eq!(scope.local_instances().unwrap().len(), 2);
        });
    }

    #[test]
    fn changed_delegates_to_timestamp_cache() {
        let mut f = fixture(Duration::ZERO);
        let row = f.db.insert_external("users", Attributes::new()).unwrap();
        f.runner.tick();

        let mapping = f.mapping.clone();
        f.runner.run(&mapping, |scope| {
            let mut instance = scope.local_type().instance(row);
            instance.link("003A").unwrap();
            assert!(scope.changed(&instance));
            scope.cache_timestamp(&instance);
            assert!(!scope.changed(&instance));
        });
        assert_eq!(f.runner.timestamps().len(), 1);

        f.runner.tick();
        assert_eq!(f.runner.timestamps().len(), 1);
    }
}
