//! Store error model and sqlx error mapping.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed: a declared version did not
    /// extend the stream, or a concurrent writer won the unique race.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Database-level failure (connection, constraint other than the
    /// version unique, corrupt row).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A stored row could not be mapped back into its record shape.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Map a sqlx error, turning unique violations into concurrency conflicts.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
            return StoreError::Concurrency(format!(
                "unique violation in {operation}: {}",
                db_err.message()
            ));
        }
    }
    StoreError::Persistence(format!("{operation}: {err}"))
}
