//! Storage errors and SQLite error classification

use rusqlite::ErrorCode;
use waymark_core::GraphError;

/// Storage failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend failure; fatal for the current operation
    #[error("sqlite: {0}")]
    Sql(rusqlite::Error),

    /// Database directory could not be created
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded
    #[error("json column: {0}")]
    Json(#[from] serde_json::Error),

    /// Graph invariant rejected the write
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Milestone code or id does not exist
    #[error("unknown milestone {0}")]
    UnknownMilestone(String),

    /// Lost a compare-and-set, hit a uniqueness constraint, or the database was busy
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Persisted row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Safe to retry the whole operation
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Conflict(format!("database busy: {err}"))
            }
            _ => Self::Sql(err),
        }
    }
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}
