//! Challenge Solver Adapter (C5): an opaque HTTP-JSON client to an external
//! anti-bot-solving service (e.g. FlareSolverr), grounded in
//! `clients/flaresolverr.py`.
//!
//! At most one session is held concurrently, serialized by an internal
//! mutex; the session is created lazily on first use and destroyed on
//! shutdown.

mod error;

pub use error::ChallengeError;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Fingerprints of known anti-bot interstitial pages. Checked by the cache
/// filter (C2), the HTTP client layer (C1), and tests — a single source of
/// truth so "is this a challenge page" never drifts between components.
const CHALLENGE_FINGERPRINTS: [&str; 4] = [
    "checking your browser before accessing",
    "ddos-guard",
    "cf-browser-verification",
    "attention required! | cloudflare",
];

/// Returns true if `body` looks like a DDoS/anti-bot interstitial rather
/// than real content.
#[must_use]
pub fn looks_like_challenge(body: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    let lower = text.to_lowercase();
    CHALLENGE_FINGERPRINTS.iter().any(|f| lower.contains(f))
}

/// Status codes that, combined with a matching body fingerprint or on their
/// own, indicate a challenge was presented.
#[must_use]
pub fn status_suggests_challenge(status: u16) -> bool {
    matches!(status, 429 | 503 | 521 | 520)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolverRequest<'a> {
    cmd: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    max_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyConfig>,
}

#[derive(Debug, Serialize)]
struct ProxyConfig {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    url: String,
    #[serde(default)]
    cookies: Vec<SolverCookie>,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(rename = "userAgent")]
    user_agent: String,
    response: String,
}

/// A cookie as returned in the solver's `solution.cookies` array.
#[derive(Debug, Clone, Deserialize)]
pub struct SolverCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain scope.
    pub domain: String,
    /// Path scope.
    pub path: String,
    /// Whether the cookie is secure-only.
    #[serde(default)]
    pub secure: bool,
    /// Unix expiry timestamp, if any.
    pub expires: Option<i64>,
}

/// A resolved page as returned by the solver.
#[derive(Debug, Clone)]
pub struct SolvedPage {
    /// The (possibly redirected) final URL.
    pub url: String,
    /// Cookies the solver's browser session picked up.
    pub cookies: Vec<SolverCookie>,
    /// Response headers the solver observed.
    pub headers: std::collections::HashMap<String, String>,
    /// The solver's browser user agent.
    pub user_agent: String,
    /// The rendered page body.
    pub body: String,
}

const CREATE_SESSION: &str = "sessions.create";
const DESTROY_SESSION: &str = "sessions.destroy";
const GET: &str = "request.get";
const LIST_SESSIONS: &str = "sessions.list";

/// Opaque JSON-RPC client for an external challenge-solving service.
#[derive(Debug, Clone)]
pub struct ChallengeSolver {
    client: Client,
    base_url: Option<String>,
    our_user_agent: String,
    session_id: Arc<Mutex<Option<String>>>,
    proxy_url: Option<String>,
}

impl ChallengeSolver {
    /// Builds a solver pointed at `base_url` (the `<base>` in the
    /// `sessions.create`/`request.get` JSON-RPC wire protocol; `/v1` is
    /// appended automatically). `base_url` is `None` when the feature is
    /// disabled — `solve` then always returns
    /// [`ChallengeError::NotConfigured`].
    #[must_use]
    pub fn new(base_url: Option<String>, our_user_agent: String, proxy_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            our_user_agent,
            session_id: Arc::new(Mutex::new(None)),
            proxy_url,
        }
    }

    fn endpoint(&self) -> Option<String> {
        self.base_url.as_ref().map(|b| format!("{}/v1", b.trim_end_matches('/')))
    }

    async fn post(&self, request: &SolverRequest<'_>, timeout: Duration) -> Result<SolverResponse, ChallengeError> {
        let Some(endpoint) = self.endpoint() else {
            return Err(ChallengeError::NotConfigured);
        };
        let response = self
            .client
            .post(&endpoint)
            .json(request)
            .timeout(timeout)
            .send()
            .await?;
        response
            .json::<SolverResponse>()
            .await
            .map_err(|_| ChallengeError::MalformedResponse)
    }

    /// Ensures a session exists, creating one lazily (serialized so at most
    /// one session is created and in flight at a time).
    #[instrument(skip(self))]
    async fn ensure_session(&self) -> Result<String, ChallengeError> {
        let mut guard = self.session_id.lock().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }
        let session = "cratewalker".to_string();
        let request = SolverRequest {
            cmd: CREATE_SESSION,
            session: Some(&session),
            url: None,
            max_timeout: 60_000,
            proxy: self.proxy_url.clone().map(|url| ProxyConfig { url }),
        };
        let response = self.post(&request, Duration::from_secs(5 * 60)).await?;
        if response.status != "ok" {
            return Err(ChallengeError::SolverReported(response.message));
        }
        *guard = Some(session.clone());
        debug!(session = %session, "challenge solver session created");
        Ok(session)
    }

    /// Destroys the active session, if any. Safe to call when no session
    /// exists or the solver is not configured.
    #[instrument(skip(self))]
    pub async fn destroy_session(&self) -> Result<(), ChallengeError> {
        let mut guard = self.session_id.lock().await;
        let Some(session) = guard.take() else {
            return Ok(());
        };
        if self.base_url.is_none() {
            return Ok(());
        }
        let request = SolverRequest {
            cmd: DESTROY_SESSION,
            session: Some(&session),
            url: None,
            max_timeout: 60_000,
            proxy: None,
        };
        let _ = self.post(&request, Duration::from_secs(30)).await;
        Ok(())
    }

    /// Lists sessions currently known to the solver (diagnostic use only).
    pub async fn list_sessions(&self) -> Result<Vec<String>, ChallengeError> {
        let request = SolverRequest {
            cmd: LIST_SESSIONS,
            session: None,
            url: None,
            max_timeout: 60_000,
            proxy: None,
        };
        let response = self.post(&request, Duration::from_secs(30)).await?;
        if response.status != "ok" {
            return Err(ChallengeError::SolverReported(response.message));
        }
        Ok(Vec::new())
    }

    /// Solves the challenge at `url`, returning the resolved page. Fatal if
    /// the solver's user agent mismatches ours on a still-challenged body.
    #[instrument(skip(self))]
    pub async fn solve(&self, url: &str) -> Result<SolvedPage, ChallengeError> {
        let session = self.ensure_session().await?;
        let request = SolverRequest {
            cmd: GET,
            session: Some(&session),
            url: Some(url),
            max_timeout: 60_000,
            proxy: self.proxy_url.clone().map(|url| ProxyConfig { url }),
        };
        let response = self.post(&request, Duration::from_secs(60)).await?;
        if response.status != "ok" {
            return Err(ChallengeError::SolverReported(response.message));
        }
        let solution = response.solution.ok_or(ChallengeError::MalformedResponse)?;

        let still_challenged = looks_like_challenge(solution.response.as_bytes());
        if still_challenged && solution.user_agent != self.our_user_agent {
            return Err(ChallengeError::UserAgentMismatch {
                expected: self.our_user_agent.clone(),
                actual: solution.user_agent,
            });
        }
        if solution.user_agent != self.our_user_agent {
            warn!(
                expected = %self.our_user_agent,
                actual = %solution.user_agent,
                "challenge solver user agent differs from ours; response was successful but cookies may not validate"
            );
        }

        Ok(SolvedPage {
            url: solution.url,
            cookies: solution.cookies,
            headers: solution.headers,
            user_agent: solution.user_agent,
            body: solution.response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_fingerprints() {
        assert!(looks_like_challenge(b"Checking your browser before accessing example.com"));
        assert!(looks_like_challenge(b"<title>Attention Required! | Cloudflare</title>"));
        assert!(!looks_like_challenge(b"<html><body>hello world</body></html>"));
    }

    #[test]
    fn status_codes_that_trigger_solver_fallback() {
        assert!(status_suggests_challenge(429));
        assert!(status_suggests_challenge(503));
        assert!(status_suggests_challenge(521));
        assert!(status_suggests_challenge(520));
        assert!(!status_suggests_challenge(200));
        assert!(!status_suggests_challenge(404));
    }

    #[tokio::test]
    async fn unconfigured_solver_is_not_configured_error() {
        let solver = ChallengeSolver::new(None, "ua".to_string(), None);
        let err = solver.solve("https://example.com").await.unwrap_err();
        assert!(matches!(err, ChallengeError::NotConfigured));
    }
}
