//! Shared, host-scoped cookie jar (C4).
//!
//! Seeded at startup from per-site Netscape cookie dumps (see
//! [`super::cookies`]) and updated atomically when the Challenge Solver
//! returns new cookies. Single writer (the challenge solver), many readers
//! (every [`crate::client::HttpClient`] request).

use std::sync::Arc;

use reqwest::cookie::Jar;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::cookies::CookieLine;
use crate::challenge::SolverCookie;

/// Shared cookie jar, safe to clone and hand to multiple `HttpClient`s.
///
/// The inner `Jar` itself is already internally synchronized by `reqwest`;
/// the `Mutex` here only serializes the *update* path so a challenge-solver
/// response and a seed-file load can never interleave their writes.
#[derive(Debug, Clone)]
pub struct CookieStore {
    jar: Arc<Jar>,
    writer: Arc<Mutex<()>>,
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the jar handle to hand to `reqwest::ClientBuilder::cookie_provider`.
    #[must_use]
    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// Seeds cookies parsed from a Netscape-format dump for one site.
    #[instrument(skip(self, cookies))]
    pub async fn seed(&self, cookies: &[CookieLine]) {
        let _guard = self.writer.lock().await;
        for cookie in cookies {
            let set_cookie = super::cookies::build_set_cookie_string(cookie);
            let origin = super::cookies::build_origin_url(cookie);
            if let Ok(url) = origin.parse::<url::Url>() {
                self.jar.add_cookie_str(&set_cookie, &url);
            } else {
                warn!(domain = %cookie.domain, "skipping cookie with unparseable domain during seed");
            }
        }
        debug!(count = cookies.len(), "seeded cookie store");
    }

    /// Installs cookies returned by the Challenge Solver.
    #[instrument(skip(self, cookies))]
    pub async fn update_from_solver(&self, cookies: &[SolverCookie]) {
        let _guard = self.writer.lock().await;
        for cookie in cookies {
            let scheme = if cookie.secure { "https" } else { "http" };
            let domain = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
            let origin = format!("{scheme}://{domain}{}", cookie.path);
            let mut set_cookie = format!("{}={}", cookie.name, cookie.value);
            set_cookie.push_str(&format!("; Domain={}", cookie.domain));
            set_cookie.push_str(&format!("; Path={}", cookie.path));
            if cookie.secure {
                set_cookie.push_str("; Secure");
            }
            let Ok(url) = origin.parse::<url::Url>() else {
                warn!(domain = %cookie.domain, "skipping solver cookie with unparseable domain");
                continue;
            };
            self.jar.add_cookie_str(&set_cookie, &url);
        }
        debug!(count = cookies.len(), "installed cookies from challenge solver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_then_solver_update_both_land_in_jar() {
        let store = CookieStore::new();
        let netscape = vec![CookieLine::new(
            ".example.com".to_string(),
            true,
            "/".to_string(),
            false,
            0,
            "session".to_string(),
            "abc".to_string(),
        )];
        store.seed(&netscape).await;

        let solver_cookies = vec![SolverCookie {
            name: "cf_clearance".to_string(),
            value: "xyz".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            secure: true,
            expires: None,
        }];
        store.update_from_solver(&solver_cookies).await;

        use reqwest::cookie::CookieStore as _;
        let url: url::Url = "https://example.com/".parse().unwrap();
        let header = store.jar().cookies(&url);
        let header = header.map(|h| h.to_str().unwrap_or_default().to_string()).unwrap_or_default();
        assert!(header.contains("session=abc"));
        assert!(header.contains("cf_clearance=xyz"));
    }
}
