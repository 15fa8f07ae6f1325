//! # crmsync Testkit
//!
//! Test utilities for crmsync.
//!
//! This crate provides:
//! - A ready-made CRM scenario over the in-memory stores
//! - Sessions that drive full cycles against a manual clock
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crmsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_new_accounts() {
//!     let env = TestEnvironment::crm();
//!     env.db.insert_external("accounts", attrs(json!({ "name": "Acme" }))).unwrap();
//!
//!     let mut session = env.session();
//!     session.cycle();
//!     assert_eq!(env.remote.count("Account"), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
