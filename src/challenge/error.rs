//! Error types for the challenge solver adapter (C5).

use thiserror::Error;

/// Errors from the external challenge-solving service.
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// The solver is not configured (no base URL supplied).
    #[error("challenge presented but no challenge solver is configured")]
    NotConfigured,

    /// Transport-level failure talking to the solver.
    #[error("challenge solver request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The solver responded with `status: "error"`.
    #[error("challenge solver reported failure: {0}")]
    SolverReported(String),

    /// The response body did not match the expected wire shape.
    #[error("challenge solver returned an unexpected response")]
    MalformedResponse,

    /// The solver's user agent did not match ours on a response that still
    /// shows a challenge page. Fatal: retrying won't help.
    #[error("challenge solver user-agent mismatch: expected {expected:?}, got {actual:?}")]
    UserAgentMismatch {
        /// The user agent our `HttpClient` is configured with.
        expected: String,
        /// The user agent the solver actually used.
        actual: String,
    },
}
