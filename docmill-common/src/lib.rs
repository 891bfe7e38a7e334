//! # DocMill Common Library
//!
//! Shared code for the DocMill document-generation service:
//! - Database models and queries (jobs, sources, artifacts, users)
//! - Credit ledger (the only mutator of user balances)
//! - Event types (DocmillEvent enum) and EventBus
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;

pub use error::{Error, Result};
