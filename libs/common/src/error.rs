//! Custom error types for the common library
//!
//! Storage adapters (PostgreSQL and Redis) report failures through
//! [`StoreError`], which also knows whether a failure is worth retrying.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Error type for storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error occurred while acquiring or using a database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// A unique constraint rejected the write
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    /// Error returned by the Redis server or client
    #[error("Cache error: {0}")]
    Cache(#[from] RedisError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Storage configuration error: {0}")]
    Configuration(String),
}

impl From<SqlxError> for StoreError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::Io(_)
            | SqlxError::WorkerCrashed => StoreError::Connection(err),
            _ => StoreError::Query(err),
        }
    }
}

impl StoreError {
    /// Whether the failure is transient (the same call may succeed later)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            StoreError::Cache(e) => {
                e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
            }
            StoreError::Query(_)
            | StoreError::Conflict(_)
            | StoreError::Migration(_)
            | StoreError::Configuration(_) => false,
        }
    }
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;
