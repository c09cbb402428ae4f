//! Shared infrastructure for the call-tracking services
//!
//! Error taxonomy, bootstrap configuration, database schema, time helpers,
//! retry/backoff helpers and the paginated result shape.

pub mod config;
pub mod db;
pub mod error;
pub mod pagination;
pub mod retry;
pub mod time;

pub use error::{Error, Result};
