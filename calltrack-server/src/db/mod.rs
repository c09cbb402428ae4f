//! Repositories over the SQLite store
//!
//! Ids are stored as UUID text and timestamps as RFC 3339 text
//! (see `calltrack_common::time::format_timestamp`), so text comparison
//! of timestamps orders them correctly.

pub mod call_logs;
pub mod processing;
pub mod rollups;
pub mod routes;
pub mod tenants;
pub mod tracking_numbers;

use calltrack_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

pub(crate) fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}
