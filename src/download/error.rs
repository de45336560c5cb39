//! Error types for the Download Engine (C7).

use thiserror::Error;

/// Errors from processing a single `DownloadItem`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The HTTP client layer failed (network, permanent status, retries
    /// exhausted, or the challenge solver failed).
    #[error("client error: {0}")]
    Client(#[from] crate::client::ClientError),

    /// The history store failed.
    #[error("history store error: {0}")]
    History(#[from] crate::history::HistoryError),

    /// Filesystem I/O failure writing the partial or complete file.
    #[error("io error writing {path}: {source}")]
    Io {
        /// Path being written.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Not enough free space at `download_folder`.
    #[error("insufficient free space at {path}: need {needed} bytes, have {available}")]
    InsufficientSpace {
        /// Target directory.
        path: std::path::PathBuf,
        /// Bytes required.
        needed: u64,
        /// Bytes actually available.
        available: u64,
    },

    /// Server-reported length was zero: a permanent failure, never
    /// written to disk.
    #[error("server reported zero-length content for {url}")]
    ZeroLength {
        /// The URL requested.
        url: String,
    },

    /// Observed transferred size did not match the expected content length
    /// after a completed stream.
    #[error("size mismatch for {url}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// The URL requested.
        url: String,
        /// Server-advertised length.
        expected: u64,
        /// Bytes actually written.
        actual: u64,
    },
}
