//! Error types for pgchain

use thiserror::Error;

/// Result type alias for pgchain operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Could not obtain a connection (pool exhausted, wait timeout, connect failure)
    #[error("Connection error: {0}")]
    Acquire(String),

    /// Statement execution error (constraint violation, syntax error, type mismatch, ...)
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Builder misuse detected before any SQL was sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid pool configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Copy of an error recorded on a builder, which may be compiled more than once.
    ///
    /// Builders only record validation and serialization errors; anything else
    /// is carried over as a validation error with the same message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Validation(message) => Self::Validation(message.clone()),
            Self::Serialization(message) => Self::Serialization(message.clone()),
            other => Self::Validation(other.to_string()),
        }
    }

    /// Check if this error happened while acquiring a connection
    pub fn is_acquire(&self) -> bool {
        matches!(self, Self::Acquire(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// SQLSTATE reported by the server, if this is a database error.
    ///
    /// Codes are exposed as-is; they are not mapped onto separate variants.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query(err) => err.as_db_error().map(|db_err| db_err.code().code()),
            _ => None,
        }
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Acquire(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
