//! Store error types, grounded on the same `sqlx::Error` conversion shape
//! used throughout the teacher's `db` module, plus a `Conflict` variant the
//! scheduler retries per spec §7 (`storage_conflict`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        StoreError::NotFound(format!("{kind} with id {id}"))
    }

    /// Whether the scheduler is allowed to retry the operation that
    /// produced this error (spec §7: only `storage_conflict` is retryable).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("no matching row".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::ConstraintViolation(db_err.to_string())
            }
            sqlx::Error::Database(db_err) if is_sqlite_busy(&db_err) => {
                StoreError::Conflict(db_err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            sqlx::Error::Migrate(migrate_err) => StoreError::Migration(migrate_err.to_string()),
            other => StoreError::Other(other.to_string()),
        }
    }
}

fn is_sqlite_busy(db_err: &Box<dyn sqlx::error::DatabaseError>) -> bool {
    db_err
        .code()
        .map(|code| code == "5" || code == "6")
        .unwrap_or(false)
}

impl From<llmctl_core::EngineError> for StoreError {
    fn from(err: llmctl_core::EngineError) -> Self {
        StoreError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
