//! # crmsync Store
//!
//! Record store contracts and in-memory backends for crmsync.
//!
//! The reconciliation engine talks to two stores it does not own:
//!
//! - a **local** relational database ([`LocalStore`]): tables of rows keyed by
//!   an integer primary key, each row carrying `updated_at` and
//!   `synchronized_at` timestamps
//! - a **remote** CRM-style object store ([`RemoteStore`]): typed objects keyed
//!   by string ids, each record carrying who modified it last and when
//!
//! This crate defines those contracts and the types that cross them. It
//! also ships [`InMemoryDatabase`] and [`InMemoryRemote`], which implement the
//! contracts without SQL or HTTP.
//!
//! ## Example
//!
//! ```rust
//! use crmsync_store::{Attributes, InMemoryDatabase, LocalStore, ManualClock, Timestamp};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
//! let db = InMemoryDatabase::new(clock);
//! db.define_table("users", ["name", "remote_id"]);
//!
//! let row = db.insert_external("users", Attributes::new()).unwrap();
//! assert_eq!(db.find("users", row.id).unwrap(), Some(row));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod clock;
mod condition;
mod error;
mod memory;
mod types;

pub use backend::{FieldDescribe, LocalStore, RemoteQuery, RemoteStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::Condition;
pub use error::{StoreError, StoreResult};
pub use memory::{
    DatabaseSnapshot, DeletedRecord, InMemoryDatabase, InMemoryRemote, ObjectSnapshot,
    RemoteSnapshot, TableSnapshot, EXTERNAL_USER_ID,
};
pub use types::{
    display_value, value_at_path, Attributes, LocalRecord, RemoteRecord, Timestamp, WriteOrigin,
};
