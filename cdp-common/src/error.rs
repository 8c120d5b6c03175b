//! Common error types for the CDP services

use serde::Serialize;
use thiserror::Error;

/// Common result type for CDP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across CDP services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad or unsafe input on a single record
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite refused the operation because another writer holds the lock.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let message = db_err.to_string();
                message.contains("database is locked") || message.contains("database table is locked")
            }
            _ => false,
        }
    }
}

/// Per-record validation failure.
///
/// Carries enough context to report the failing record without aborting
/// the batch it arrived in.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Validation failed for tenant '{tenant_id}', field '{field}' (value {value:?}): {reason}")]
pub struct ValidationError {
    pub tenant_id: String,
    pub field: String,
    pub value: Option<String>,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        tenant_id: impl Into<String>,
        field: impl Into<String>,
        value: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            field: field.into(),
            value: value.map(str::to_string),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_message_names_field_and_value() {
        let err = ValidationError::new("demo", "email", Some("not-an-email"), "missing '@'");
        let message = err.to_string();
        assert!(message.contains("demo"));
        assert!(message.contains("email"));
        assert!(message.contains("not-an-email"));
    }

    #[test]
    fn lock_contention_is_recognized_by_message() {
        assert!(Error::Database(sqlx::Error::Protocol("database is locked".into())).is_lock_contention());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_lock_contention());
        assert!(!Error::Config("database is locked".into()).is_lock_contention());
    }
}
