//! HTTP Client Layer (C1): issues GET/HEAD/POST requests through the cache
//! (C2), rate governor (C3), cookie jar (C4), and challenge solver (C5).
//!
//! Built on `download/client.rs`'s retry-with-UA fallback and timeout
//! configuration, generalized with the cache/rate/cookie/challenge wiring.

mod error;

pub use error::ClientError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, instrument, warn};

use crate::auth::CookieStore;
use crate::cache::RequestCache;
use crate::challenge::{ChallengeSolver, looks_like_challenge, status_suggests_challenge};
use crate::governor::RateGovernor;

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// TLS verification policy. `reqwest`'s rustls-tls backend
/// doesn't expose `truststore`/`certifi` as distinct verifier sources the
/// way the original Python client does; both non-`none` variants map to
/// the platform's native-certs verifier, which is the closest idiomatic
/// equivalent available to a `reqwest::ClientBuilder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// OS trust store only.
    Truststore,
    /// Mozilla's `certifi` bundle only.
    Certifi,
    /// Both (the default).
    #[default]
    TruststoreAndCertifi,
    /// No TLS verification. Dangerous; for debugging against self-signed
    /// test fixtures only.
    None,
}

/// A parsed HTTP response as returned by the client layer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lower-cased keys.
    pub headers: HashMap<String, String>,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// True if this response came from the cache rather than the network.
    pub from_cache: bool,
}

/// Configuration for [`HttpClient::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User-Agent sent on every request unless the caller overrides it.
    pub user_agent: String,
    /// Outbound proxy, if any.
    pub proxy: Option<String>,
    /// TLS verification mode.
    pub tls: TlsVerification,
    /// Maximum retry attempts for transient network errors (`download_attempts`).
    pub download_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("cratewalker/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            tls: TlsVerification::default(),
            download_attempts: 5,
        }
    }
}

/// HTTP Client Layer (C1). Cheap to clone; all shared state lives behind
/// `Arc`s in the collaborator components it is constructed with.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    config: ClientConfig,
    cache: Arc<RequestCache>,
    governor: Arc<RateGovernor>,
    cookies: CookieStore,
    challenge: Arc<ChallengeSolver>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("user_agent", &self.config.user_agent)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Builds a client wired to its collaborators. The underlying `reqwest`
    /// client shares the cookie jar's `Arc<Jar>` so cookie updates from the
    /// challenge solver are visible on the very next request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Network`]-shaped build failure if the
    /// `reqwest::ClientBuilder` cannot construct a client from `config`
    /// (invalid proxy URL, unsupported TLS combination).
    pub fn new(
        config: ClientConfig,
        cache: Arc<RequestCache>,
        governor: Arc<RateGovernor>,
        cookies: CookieStore,
        challenge: Arc<ChallengeSolver>,
    ) -> Result<Self, ClientError> {
        let mut builder = ClientBuilder::new()
            .cookie_provider(cookies.jar())
            .user_agent(config.user_agent.clone())
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .gzip(true);

        if config.tls == TlsVerification::None {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy_url) = &config.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|source| ClientError::Network {
                url: proxy_url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }

        let inner = builder.build().map_err(|source| ClientError::Network {
            url: "<client builder>".to_string(),
            source,
        })?;

        Ok(Self {
            inner,
            config,
            cache,
            governor,
            cookies,
            challenge,
        })
    }

    /// Issues a GET, optionally serving from / storing to the request
    /// cache. `cacheable = false` forces a live fetch and skips storage.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str, cacheable: bool) -> Result<HttpResponse, ClientError> {
        self.get_with_headers(url, &HashMap::new(), cacheable).await
    }

    /// GET with extra request headers (e.g. a per-scraper Referer).
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        cacheable: bool,
    ) -> Result<HttpResponse, ClientError> {
        if cacheable {
            if let Some(cached) = self.cache.get("GET", url).await? {
                debug!(url, "serving GET from request cache");
                return Ok(HttpResponse {
                    status: cached.status,
                    headers: cached.headers,
                    body: cached.body,
                    from_cache: true,
                });
            }
        }

        let response = self.execute("GET", url, headers, None).await?;

        self.cache
            .put(
                "GET",
                url,
                response.status,
                &response.headers,
                &response.body,
                cacheable,
                false,
            )
            .await?;

        Ok(response)
    }

    /// HEAD request; never cached (used for resumability/size probes).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn head(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.execute("HEAD", url, &HashMap::new(), None).await
    }

    /// POST request; not cached by default. POST caching is opt-in and out
    /// of scope for this client's default path.
    #[instrument(skip(self, headers, body), fields(url = %url))]
    pub async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, ClientError> {
        self.execute("POST", url, headers, Some(body)).await
    }

    /// Forces eviction of any cached GET for `url` (the `bust=true` path).
    pub async fn bust(&self, url: &str) -> Result<(), ClientError> {
        self.cache.evict("GET", url).await?;
        Ok(())
    }

    /// Runs one logical request through rate limiting, retries, and the
    /// challenge-solver fallback.
    async fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ClientError> {
        let mut last_error: Option<ClientError> = None;
        let mut challenge_attempted = false;

        for attempt in 1..=self.config.download_attempts {
            self.governor.acquire(url).await;
            match self.send_once(method, url, headers, body.clone()).await {
                Ok(response) => {
                    let challenge_signalled = status_suggests_challenge(response.status)
                        || looks_like_challenge(&response.body);

                    if challenge_signalled && !challenge_attempted {
                        challenge_attempted = true;
                        match self.challenge.solve(url).await {
                            Ok(solved) => {
                                self.cookies.update_from_solver(&solved.cookies).await;
                                return Ok(HttpResponse {
                                    status: 200,
                                    headers: solved.headers,
                                    body: solved.body.into_bytes(),
                                    from_cache: false,
                                });
                            }
                            Err(source) => {
                                return Err(ClientError::Challenge {
                                    url: url.to_string(),
                                    source,
                                });
                            }
                        }
                    }

                    if (400..500).contains(&response.status)
                        && !matches!(response.status, 408 | 429)
                    {
                        return Err(ClientError::PermanentHttp {
                            url: url.to_string(),
                            status: response.status,
                        });
                    }

                    return Ok(response);
                }
                Err(err) => {
                    warn!(attempt, url, error = %err, "transient request failure");
                    last_error = Some(err);
                    if attempt < self.config.download_attempts {
                        let backoff = backoff_for_attempt(attempt);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(ClientError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.config.download_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn send_once(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ClientError> {
        let mut request = match method {
            "HEAD" => self.inner.head(url),
            "POST" => self.inner.post(url),
            _ => self.inner.get(url),
        };
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let mut out_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                out_headers.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| ClientError::Network {
                url: url.to_string(),
                source,
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers: out_headers,
            body,
            from_cache: false,
        })
    }
}

/// Bounded exponential backoff with jitter for attempt `n` (1-indexed).
fn backoff_for_attempt(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 250u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4 + 1);
    Duration::from_millis((base_ms + jitter).min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeSolver;
    use crate::governor::GovernorConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_client() -> HttpClient {
        let cache = Arc::new(RequestCache::open_in_memory().await.unwrap());
        let governor = Arc::new(RateGovernor::new(GovernorConfig {
            capacity: 100,
            period: Duration::from_millis(10),
            ..GovernorConfig::default()
        }));
        let cookies = CookieStore::new();
        let challenge = Arc::new(ChallengeSolver::new(None, "cratewalker/test".into(), None));
        HttpClient::new(ClientConfig::default(), cache, governor, cookies, challenge).unwrap()
    }

    #[tokio::test]
    async fn get_returns_body_and_caches_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client().await;
        let url = format!("{}/a", server.uri());
        let first = client.get(&url, true).await.unwrap();
        assert_eq!(first.body, b"hello");
        assert!(!first.from_cache);

        let second = client.get(&url, true).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn permanent_http_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client().await;
        let url = format!("{}/missing", server.uri());
        let err = client.get(&url, false).await.unwrap_err();
        assert!(matches!(err, ClientError::PermanentHttp { status: 404, .. }));
    }

    #[tokio::test]
    async fn uncacheable_get_is_never_stored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"v1".to_vec()))
            .mount(&server)
            .await;

        let client = test_client().await;
        let url = format!("{}/b", server.uri());
        client.get(&url, false).await.unwrap();
        let second = client.get(&url, true).await.unwrap();
        assert!(!second.from_cache);
    }
}
