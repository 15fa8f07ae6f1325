//! # crmsync Engine
//!
//! Bidirectional reconciliation between a local relational database and a
//! remote CRM object store.
//!
//! This crate provides:
//! - Declarative mappings between local tables and remote object types
//! - Record type adapters and instances over both stores
//! - A runner that windows each cycle and memoizes its queries
//! - Six tasks: clean, attach, initialize, collect, associate, synchronize
//! - A task manager that orders them in two passes
//! - An async worker that polls on a schedule
//!
//! ## Architecture
//!
//! Every cycle looks at the records either side changed inside a time window
//! `after < t <= before`, where `after` is the start of the previous cycle.
//! The first pass, per mapping:
//! 1. **Clean**: drop local rows whose remote record is gone or out of scope
//! 2. **Attach**: finish links left by interrupted remote creates
//! 3. **Initialize**: create missing counterparts on either side
//! 4. **Collect**: gather changed attributes from linked pairs
//!
//! The second pass, per mapping:
//! 5. **Associate**: reconcile `BelongsTo` links
//! 6. **Synchronize**: write the newest attribute values to both sides
//!
//! ## Key Invariants
//!
//! - Engine writes are recognised and never collected as changes
//! - A record is linked to at most one counterpart through its lookup column
//! - Record failures are logged and skipped; they never abort a cycle
//! - The tracker only advances after a completed cycle

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accumulator;
mod associations;
mod cache;
mod config;
mod error;
mod field_processor;
mod instance;
mod manager;
mod mapping;
mod record_type;
mod runner;
mod tasks;
mod tracker;
mod worker;

pub use accumulator::{AccumulatedChanges, Accumulator, ChangeKey};
pub use associations::{AssociationBuilder, BuildCache, BuildOutcome, Links, NodeHandle};
pub use cache::{CollectionKey, RunnerCache, TimestampCache};
pub use config::EngineConfig;
pub use error::{SyncError, SyncResult};
pub use field_processor::{Action, FieldProcessor};
pub use instance::{Instance, LocalInstance, RecordKey, RemoteInstance, Side};
pub use manager::{CycleReport, TaskManager, TaskOutcome};
pub use mapping::{
    Association, AssociationKind, BuildStrategy, FieldMap, Mapping, MappingBuilder, Registry,
    SYNC_TOKEN_FIELD,
};
pub use record_type::{Backends, LocalRecordType, RemoteRecordType};
pub use runner::{Runner, Scope, Window};
pub use tasks::{
    Associator, Attacher, Cleaner, Collector, Initializer, Synchronizer, Task, TaskStats,
};
pub use tracker::{FileTracker, MemoryTracker, Tracker};
pub use worker::{Worker, WorkerStats};
