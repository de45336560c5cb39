//! Error types for the history/dedup store (C6).

use thiserror::Error;

/// Errors from the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Underlying database failure.
    #[error("history database error: {0}")]
    Database(#[from] crate::db::DbError),
}
