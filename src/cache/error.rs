//! Error types for the request cache (C2).

use thiserror::Error;

/// Errors that can occur while reading or writing the request cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying database failure.
    #[error("cache database error: {0}")]
    Database(#[from] crate::db::DbError),

    /// Failed to (de)serialize cached headers.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
