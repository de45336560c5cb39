//! Crate-level error aggregation.
//!
//! Each component (client, cache, governor, challenge solver, history store,
//! download engine, scraper registry, dispatcher) defines its own
//! `thiserror` enum; `CoreError` wraps them with `#[from]` so call sites that
//! cross component boundaries (mainly the dispatcher) can propagate with `?`
//! without hand-rolled conversions.

use thiserror::Error;

use crate::cache::CacheError;
use crate::challenge::ChallengeError;
use crate::client::ClientError;
use crate::dispatch::DispatchError;
use crate::download::EngineError;
use crate::history::HistoryError;

/// Top-level error type for `cratewalker_core`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// HTTP client layer failure (C1).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Request cache failure (C2).
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Challenge solver failure (C5).
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    /// History store failure (C6).
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Download engine failure (C7).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Dispatcher/scheduler failure (C9).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Startup configuration is invalid; fatal, not retried.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
