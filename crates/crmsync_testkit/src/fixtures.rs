//! Test fixtures and store helpers.
//!
//! Provides a ready-made CRM scenario over the in-memory stores and a
//! [`Session`] that drives full cycles against a manual clock.

use crmsync_engine::{
    Association, Backends, CycleReport, EngineConfig, FileTracker, Mapping, Registry, Runner,
    TaskManager, SYNC_TOKEN_FIELD,
};
use crmsync_store::{
    Attributes, FieldDescribe, InMemoryDatabase, InMemoryRemote, ManualClock, Timestamp,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// User id the engine writes to the remote store as.
pub const ENGINE_USER_ID: &str = "005ENGINEUSER";

/// Time the fixture clock starts at.
pub const START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// How far the clock moves around each cycle.
pub const STEP: Duration = Duration::from_secs(1);

/// Converts a JSON object into [`Attributes`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn attrs(value: Value) -> Attributes {
    serde_json::from_value(value).expect("attributes must be a JSON object")
}

/// Two in-memory stores sharing a manual clock, and the mappings between them.
pub struct TestEnvironment {
    /// The shared clock.
    pub clock: Arc<ManualClock>,
    /// The local database.
    pub db: Arc<InMemoryDatabase>,
    /// The remote store.
    pub remote: Arc<InMemoryRemote>,
    /// Registered mappings.
    pub registry: Arc<Registry>,
}

impl TestEnvironment {
    /// Creates empty stores and an empty registry.
    pub fn empty() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        Self {
            db: Arc::new(InMemoryDatabase::new(clock.clone())),
            remote: Arc::new(InMemoryRemote::new(clock.clone(), ENGINE_USER_ID)),
            clock,
            registry: Arc::new(Registry::new()),
        }
    }

    /// Creates the CRM scenario.
    ///
    /// | local      | remote    | fields                              | associations          |
    /// |------------|-----------|-------------------------------------|-----------------------|
    /// | `accounts` | `Account` | name, industry                      | has many `contacts`   |
    /// | `contacts` | `Contact` | first_name, last_name, email        | belongs to `account`  |
    pub fn crm() -> Self {
        let mut env = Self::empty();

        env.db
            .define_table("accounts", ["name", "industry", "account_remote_id"]);
        env.db.define_table(
            "contacts",
            ["first_name", "last_name", "email", "account_id", "contact_remote_id"],
        );
        env.remote.define_object(
            "Account",
            vec![
                FieldDescribe::writable("Name"),
                FieldDescribe::writable("Industry"),
                FieldDescribe::writable(SYNC_TOKEN_FIELD),
            ],
        );
        env.remote.define_object(
            "Contact",
            vec![
                FieldDescribe::writable("FirstName"),
                FieldDescribe::writable("LastName"),
                FieldDescribe::writable("Email"),
                FieldDescribe::writable("AccountId"),
                FieldDescribe::writable("Status"),
                FieldDescribe::writable(SYNC_TOKEN_FIELD),
            ],
        );

        env.register(
            Mapping::builder("accounts", "Account")
                .field("name", "Name")
                .field("industry", "Industry")
                .association(Association::has_many(
                    "contacts",
                    "contacts",
                    "account_id",
                    "AccountId",
                ))
                .build(env.db.as_ref())
                .expect("accounts mapping"),
        );
        env.register(
            Mapping::builder("contacts", "Contact")
                .field("first_name", "FirstName")
                .field("last_name", "LastName")
                .field("email", "Email")
                .association(Association::belongs_to(
                    "account",
                    "accounts",
                    "account_id",
                    "AccountId",
                ))
                .build(env.db.as_ref())
                .expect("contacts mapping"),
        );
        env
    }

    /// Registers a mapping, replacing any mapping for the same table.
    pub fn register(&mut self, mapping: Mapping) -> Arc<Mapping> {
        Arc::make_mut(&mut self.registry).insert(mapping)
    }

    /// Moves the clock forward one [`STEP`].
    pub fn advance(&self) {
        self.clock.advance(STEP);
    }

    /// Creates a runner over the environment with default configuration.
    pub fn runner(&self) -> Runner {
        self.runner_with(&EngineConfig::new())
    }

    /// Creates a runner over the environment.
    pub fn runner_with(&self, config: &EngineConfig) -> Runner {
        Runner::new(
            Arc::clone(&self.registry),
            Backends::new(self.db.clone(), self.remote.clone()),
            self.clock.clone(),
            config,
        )
    }

    /// Creates a task manager for the registry.
    ///
    /// # Panics
    ///
    /// Panics if the registry does not validate.
    pub fn manager(&self) -> TaskManager {
        TaskManager::new(&self.registry).expect("registry must validate")
    }

    /// Starts a session of consecutive cycles.
    pub fn session(&self) -> Session {
        Session {
            clock: self.clock.clone(),
            runner: self.runner(),
            manager: self.manager(),
        }
    }
}

/// Consecutive cycles over one runner.
pub struct Session {
    clock: Arc<ManualClock>,
    runner: Runner,
    manager: TaskManager,
}

impl Session {
    /// Runs one cycle.
    ///
    /// The clock moves one [`STEP`] before the cycle so earlier writes fall
    /// inside its window, and one after, so writes made between cycles fall
    /// strictly after it.
    pub fn cycle(&mut self) -> CycleReport {
        self.clock.advance(STEP);
        self.runner.tick();
        let report = self.manager.perform(&mut self.runner);
        self.runner.release_records();
        self.clock.advance(STEP);
        report
    }

    /// The session's runner.
    pub fn runner(&self) -> &Runner {
        &self.runner
    }
}

/// Creates a file tracker in a fresh temporary directory.
///
/// Keep the directory alive for as long as the tracker is used.
///
/// # Panics
///
/// Panics if the directory cannot be created.
pub fn temp_tracker() -> (TempDir, FileTracker) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let tracker = FileTracker::new(dir.path().join("last_run.json"));
    (dir, tracker)
}
