//! Database access layer
//!
//! All persistence goes through this module: schema initialization, typed
//! models, and query functions for jobs, sources, artifacts, and users.
//! Balance mutations live in `crate::ledger`, never here.

pub mod artifacts;
pub mod init;
pub mod jobs;
pub mod models;
pub mod sources;
pub mod users;

pub use init::init_database;
