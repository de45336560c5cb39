//! Error types for the HTTP client layer (C1).

use thiserror::Error;

/// Errors from issuing or retrying an HTTP request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure (DNS, connection reset, TLS, timeout).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL being requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// A permanent HTTP status (4xx other than 408/429) — not retried.
    #[error("permanent HTTP error {status} fetching {url}")]
    PermanentHttp {
        /// The URL requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Retries were exhausted without success.
    #[error("request to {url} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The URL requested.
        url: String,
        /// Total attempts made.
        attempts: u32,
        /// The last error's display text.
        last_error: String,
    },

    /// A challenge page was detected but no solver is configured, or the
    /// solver itself failed.
    #[error("challenge could not be solved for {url}: {source}")]
    Challenge {
        /// The URL requested.
        url: String,
        /// The underlying challenge-solver error.
        #[source]
        source: crate::challenge::ChallengeError,
    },

    /// The request cache layer failed (distinct from a cache miss).
    #[error("request cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// `RUNNING` was cleared and shutdown requested mid-wait.
    #[error("shutting down")]
    ShuttingDown,
}
