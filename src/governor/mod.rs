//! Rate Governor (C3): per-host token buckets, global/per-host concurrency
//! semaphores, and a download-speed byte bucket.
//!
//! Generalizes the minimum-delay [`crate`] predecessor pattern (a per-domain
//! `DashMap<String, Mutex<Instant>>` gate) into a true token bucket with
//! capacity and refill rate, plus the two `tokio::sync::Semaphore`s for
//! global and per-host download concurrency. Token handout is FIFO per
//! host because both the bucket's internal mutex and `Semaphore` queue
//! waiters in acquisition order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

/// Cumulative per-host delay above which a warning is logged, surfacing
/// hosts that are effectively serializing the whole run.
const CUMULATIVE_DELAY_WARNING: Duration = Duration::from_secs(30);

/// Configuration for a [`RateGovernor`].
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Token bucket capacity per host.
    pub capacity: u32,
    /// Refill period: `capacity` tokens are restored every `period`.
    pub period: Duration,
    /// Maximum number of downloads in flight across all hosts.
    pub max_simultaneous_downloads: usize,
    /// Maximum number of downloads in flight per host.
    pub max_simultaneous_downloads_per_domain: usize,
    /// Bytes/sec cap for the download-speed shaper. `0` means unlimited.
    pub download_speed_limit: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            period: Duration::from_secs(1),
            max_simultaneous_downloads: 15,
            max_simultaneous_downloads_per_domain: 3,
            download_speed_limit: 0,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    period: Duration,
    state: Mutex<BucketState>,
    cumulative_delay: std::sync::atomic::AtomicU64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, period: Duration) -> Self {
        Self {
            capacity,
            period,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            cumulative_delay: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Waits (if necessary) for one token, FIFO per host via the mutex's
    /// own wait queue.
    async fn acquire(&self, host: &str) {
        if self.capacity == 0 {
            return;
        }
        let refill_rate = f64::from(self.capacity) / self.period.as_secs_f64();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * refill_rate).min(f64::from(self.capacity));
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / refill_rate))
                }
            };

            let Some(wait) = wait else { break };
            let total_ms = self
                .cumulative_delay
                .fetch_add(wait.as_millis() as u64, std::sync::atomic::Ordering::SeqCst)
                + wait.as_millis() as u64;
            if Duration::from_millis(total_ms) >= CUMULATIVE_DELAY_WARNING {
                warn!(host, delay_ms = total_ms, "host has accumulated heavy rate-limit delay");
            }
            tokio::time::sleep(wait).await;
        }
    }
}

struct HostSlot {
    bucket: TokenBucket,
    concurrency: Arc<Semaphore>,
}

/// Per-host token bucket plus global/per-host download concurrency caps and
/// a byte-rate shaper, as described in.3.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    hosts: DashMap<String, Arc<HostSlot>>,
    global_downloads: Arc<Semaphore>,
    byte_bucket: ByteBucket,
}

impl std::fmt::Debug for HostSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSlot").finish_non_exhaustive()
    }
}

/// A permit proving a download slot was acquired; releases both the global
/// and per-host semaphores on drop.
pub struct DownloadPermit {
    _global: tokio::sync::OwnedSemaphorePermit,
    _host: tokio::sync::OwnedSemaphorePermit,
}

impl RateGovernor {
    /// Creates a governor from the given configuration.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let global_downloads = Arc::new(Semaphore::new(config.max_simultaneous_downloads.max(1)));
        let byte_bucket = ByteBucket::new(config.download_speed_limit);
        Self {
            config,
            hosts: DashMap::new(),
            global_downloads,
            byte_bucket,
        }
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        if let Some(slot) = self.hosts.get(host) {
            return Arc::clone(&slot);
        }
        let slot = Arc::new(HostSlot {
            bucket: TokenBucket::new(self.config.capacity, self.config.period),
            concurrency: Arc::new(Semaphore::new(
                self.config.max_simultaneous_downloads_per_domain.max(1),
            )),
        });
        self.hosts.insert(host.to_string(), Arc::clone(&slot));
        slot
    }

    /// Blocks until a request token for `url`'s host is available.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, url: &str) {
        let host = host_of(url);
        debug!(host = %host, "acquiring rate-limit token");
        self.slot(&host).bucket.acquire(&host).await;
    }

    /// Acquires a download concurrency permit (global + per-host), in that
    /// order to avoid holding a host slot while blocked on the global cap.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire_download_slot(&self, url: &str) -> DownloadPermit {
        let host = host_of(url);
        let slot = self.slot(&host);
        #[allow(clippy::expect_used)]
        let global = Arc::clone(&self.global_downloads)
            .acquire_owned()
            .await
            .expect("global download semaphore never closes");
        #[allow(clippy::expect_used)]
        let per_host = Arc::clone(&slot.concurrency)
            .acquire_owned()
            .await
            .expect("per-host download semaphore never closes");
        DownloadPermit {
            _global: global,
            _host: per_host,
        }
    }

    /// Acquires permission to read `n` bytes under the download-speed cap.
    pub async fn acquire_bytes(&self, n: u64) {
        self.byte_bucket.acquire(n).await;
    }
}

/// Byte-denominated token bucket backing `download_speed_limit`.
#[derive(Debug)]
struct ByteBucket {
    limit: u64,
    state: Mutex<(f64, Instant)>,
}

impl ByteBucket {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            state: Mutex::new((limit as f64, Instant::now())),
        }
    }

    async fn acquire(&self, n: u64) {
        if self.limit == 0 || n == 0 {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.1.elapsed().as_secs_f64();
                state.0 = (state.0 + elapsed * self.limit as f64).min(self.limit as f64);
                state.1 = Instant::now();
                if state.0 >= n as f64 {
                    state.0 -= n as f64;
                    None
                } else {
                    let deficit = n as f64 - state.0;
                    Some(Duration::from_secs_f64(deficit / self.limit as f64))
                }
            };
            let Some(wait) = wait else { break };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Extracts the registrable host from a URL, falling back to the whole
/// string if it fails to parse (callers should validate URLs earlier; this
/// only guards the rate governor against a malformed input making it panic).
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_immediate_when_tokens_available() {
        let gov = RateGovernor::new(GovernorConfig {
            capacity: 5,
            period: Duration::from_secs(1),
            ..GovernorConfig::default()
        });
        let start = Instant::now();
        for _ in 0..5 {
            gov.acquire("https://example.com/a").await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn acquire_waits_once_bucket_exhausted() {
        let gov = RateGovernor::new(GovernorConfig {
            capacity: 1,
            period: Duration::from_millis(200),
            ..GovernorConfig::default()
        });
        gov.acquire("https://example.com/a").await;
        let start = Instant::now();
        gov.acquire("https://example.com/a").await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn different_hosts_do_not_share_a_bucket() {
        let gov = RateGovernor::new(GovernorConfig {
            capacity: 1,
            period: Duration::from_secs(10),
            ..GovernorConfig::default()
        });
        gov.acquire("https://a.example.com/x").await;
        let start = Instant::now();
        gov.acquire("https://b.example.com/x").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn download_slot_respects_per_host_cap() {
        let gov = Arc::new(RateGovernor::new(GovernorConfig {
            max_simultaneous_downloads: 10,
            max_simultaneous_downloads_per_domain: 1,
            ..GovernorConfig::default()
        }));
        let _permit = gov.acquire_download_slot("https://example.com/a").await;
        let gov2 = Arc::clone(&gov);
        let acquired_second = tokio::time::timeout(Duration::from_millis(100), async move {
            gov2.acquire_download_slot("https://example.com/b").await
        })
        .await;
        assert!(acquired_second.is_err(), "second slot on same host should block");
    }

    #[tokio::test]
    async fn byte_bucket_unlimited_by_default() {
        let gov = RateGovernor::new(GovernorConfig::default());
        let start = Instant::now();
        gov.acquire_bytes(10_000_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
