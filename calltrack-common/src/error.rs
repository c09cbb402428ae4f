//! Common error types for the call-tracking services

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Common result type for call-tracking operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store, the outbound clients and the services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error not covered by a constraint mapping
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found (or not owned by the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input or shape
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Concurrent update, duplicate natural key or state mismatch
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Tenant has no tracking-number capacity left
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Missing or invalid request signature
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Provider 429/5xx or network failure; safe to retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Provider rejected the request; retrying will not help
    #[error("Fatal failure: {0}")]
    Fatal(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return Error::NotFound("Row not found".to_string());
        }

        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    return Error::Conflict("Duplicate value".to_string());
                }
                ErrorKind::ForeignKeyViolation => {
                    return Error::Validation("Operation blocked by related records".to_string());
                }
                ErrorKind::NotNullViolation => {
                    return Error::Validation("Missing required fields".to_string());
                }
                ErrorKind::CheckViolation => {
                    return Error::Validation(format!("Constraint violated: {}", db_err.message()));
                }
                _ => {}
            }
        }

        Error::Database(err)
    }
}

impl Error {
    /// True for SQLite lock/busy errors
    pub fn is_lock_error(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let text = db_err.to_string();
                text.contains("database is locked") || text.contains("database is busy")
            }
            _ => false,
        }
    }

    /// True when repeating the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Conflict(_)) || self.is_lock_error()
    }
}
