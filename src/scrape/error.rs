//! Errors a [`crate::scrape::Scraper`] can surface.

use thiserror::Error;

/// Errors surfaced by scraper implementations and [`crate::scrape::ScraperContext`].
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The HTTP client layer failed fetching a page.
    #[error("client error: {0}")]
    Client(#[from] crate::client::ClientError),

    /// The history store failed while checking completion state.
    #[error("history store error: {0}")]
    History(#[from] crate::history::HistoryError),

    /// A page didn't have the shape the scraper expected (markup changed,
    /// required field missing, etc.) — not retryable by re-requesting.
    #[error("unexpected page shape at {url}: {reason}")]
    UnexpectedShape {
        /// The URL that produced the unexpected shape.
        url: String,
        /// Human-readable description of what was expected.
        reason: String,
    },

    /// The item's child cap was hit while enumerating a collection;
    /// surfaced as a warning by the dispatcher rather than a hard failure.
    #[error("max children reached for {url}")]
    MaxChildrenReached {
        /// The collection URL whose cap was hit.
        url: String,
    },
}
