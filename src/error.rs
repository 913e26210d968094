//! Error types for Cumulus.

use std::time::Duration;

use thiserror::Error;

/// Common error type for Cumulus.
#[derive(Error, Debug)]
pub enum CumulusError {
    /// Database error.
    ///
    /// Wraps any sqlx failure that is not a uniqueness violation.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A sibling with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage does not have enough free capacity.
    #[error("quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded {
        /// Bytes the operation needs.
        requested: i64,
        /// Bytes still free in the storage.
        available: i64,
    },

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Object backend failure.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Upload pipeline failure (stream, worker or truncation).
    #[error("upload error: {0}")]
    Upload(String),

    /// No chunk completed within the idle window.
    #[error("upload stalled: no progress for {0:?}")]
    UploadTimeout(Duration),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CumulusError {
    /// Whether this error is an infrastructure failure rather than an
    /// expected domain outcome.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CumulusError::Database(_)
                | CumulusError::Io(_)
                | CumulusError::ObjectStore(_)
                | CumulusError::Upload(_)
                | CumulusError::UploadTimeout(_)
                | CumulusError::Config(_)
        )
    }
}

// Uniqueness violations surface as conflicts; everything else is internal.
impl From<sqlx::Error> for CumulusError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return CumulusError::Conflict(db_err.message().to_string());
            }
        }
        CumulusError::Database(e.to_string())
    }
}

/// Result type alias for Cumulus operations.
pub type Result<T> = std::result::Result<T, CumulusError>;
