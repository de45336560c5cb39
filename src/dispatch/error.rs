//! Errors from the Dispatcher/Scheduler (C9).

use thiserror::Error;

/// Fatal dispatcher-level failures. Per-item failures never surface here —
/// they are logged and recorded via [`crate::history::HistoryStore`]
/// instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The history store failed while reading a retry-mode input source.
    #[error("history store error: {0}")]
    History(#[from] crate::history::HistoryError),

    /// The input file could not be read from disk.
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        /// The path that failed to open.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
