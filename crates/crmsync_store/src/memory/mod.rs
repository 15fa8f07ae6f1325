//! In-memory store backends for tests and file-backed state.

mod database;
mod remote;

pub use database::{DatabaseSnapshot, InMemoryDatabase, TableSnapshot};
pub use remote::{DeletedRecord, InMemoryRemote, ObjectSnapshot, RemoteSnapshot, EXTERNAL_USER_ID};
