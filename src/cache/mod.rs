//! Request Cache (C2): a persistent, URL-scoped response cache with
//! per-host TTL and method/status filters.
//!
//! Schema and pooling are shared with [`crate::history`] via
//! [`crate::db::Database`]; this module owns only the cache-specific
//! filter rules.

mod error;

pub use error::CacheError;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;

/// Statuses the cache is ever allowed to persist.
const CACHEABLE_STATUSES: [u16; 4] = [200, 404, 410, 451];

/// Default TTL when no host pattern matches.
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Host-class used to pick a registered TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostClass {
    /// A "file-host" style site (media CDNs, galleries).
    FileHost,
    /// A forum-style site (longer-lived pages, paginated threads).
    Forum,
}

/// A cached response, as read back from storage.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// Persistent, TTL-bound HTTP response cache.
#[derive(Debug, Clone)]
pub struct RequestCache {
    db: Database,
    host_ttls: HashMap<String, Duration>,
    file_host_ttl: Duration,
    forum_ttl: Duration,
}

impl RequestCache {
    /// Opens the cache database at `db_path` and runs its migrations.
    pub async fn open(
        db_path: &Path,
        file_host_ttl: Duration,
        forum_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let db = Database::open(db_path).await?;
        sqlx::migrate!("./migrations/cache")
            .run(db.pool())
            .await
            .map_err(crate::db::DbError::Migration)?;
        let cache = Self {
            db,
            host_ttls: HashMap::new(),
            file_host_ttl,
            forum_ttl,
        };
        cache.sweep_expired().await?;
        Ok(cache)
    }

    /// In-memory cache for tests.
    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let db = Database::open_in_memory().await?;
        sqlx::migrate!("./migrations/cache")
            .run(db.pool())
            .await
            .map_err(crate::db::DbError::Migration)?;
        Ok(Self {
            db,
            host_ttls: HashMap::new(),
            file_host_ttl: Duration::from_secs(7 * 24 * 3600),
            forum_ttl: Duration::from_secs(28 * 24 * 3600),
        })
    }

    /// Registers a host pattern's TTL class, mirroring how scraper metadata
    /// (`domain` / `supported_sites`) seeds `urls_expire_after` at startup.
    pub fn register_host(&mut self, host_suffix: &str, class: HostClass) {
        let ttl = match class {
            HostClass::FileHost => self.file_host_ttl,
            HostClass::Forum => self.forum_ttl,
        };
        self.host_ttls.insert(host_suffix.to_lowercase(), ttl);
    }

    fn ttl_for(&self, url: &str) -> Duration {
        let Ok(parsed) = url::Url::parse(url) else {
            return DEFAULT_TTL;
        };
        let Some(host) = parsed.host_str() else {
            return DEFAULT_TTL;
        };
        for (suffix, ttl) in &self.host_ttls {
            if host == suffix || host.ends_with(&format!(".{suffix}")) {
                return *ttl;
            }
        }
        DEFAULT_TTL
    }

    /// Looks up a cached response, returning `None` on a miss or an expired
    /// entry (expired rows are lazily reaped here and by `sweep_expired`).
    #[instrument(skip(self))]
    pub async fn get(&self, method: &str, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        let now = now_unix();
        let row = sqlx::query(
            "SELECT status, headers_json, body, expires_at FROM cache_entries \
             WHERE method = ? AND url = ?",
        )
        .bind(method)
        .bind(url)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: i64 = row.try_get("expires_at").unwrap_or(0);
        if expires_at <= now {
            self.evict(method, url).await?;
            return Ok(None);
        }
        let headers_json: String = row.try_get("headers_json").unwrap_or_default();
        let headers = serde_json::from_str(&headers_json)?;
        Ok(Some(CachedResponse {
            status: row.try_get::<i64, _>("status").unwrap_or(0) as u16,
            headers,
            body: row.try_get("body").unwrap_or_default(),
        }))
    }

    /// Stores a response if the method/status/body pass the cache filter;
    /// silently skipped otherwise (never an error — a cache miss for a
    /// request the caller marked non-cacheable is expected behavior).
    #[instrument(skip(self, headers, body))]
    pub async fn put(
        &self,
        method: &str,
        url: &str,
        status: u16,
        headers: &HashMap<String, String>,
        body: &[u8],
        cacheable: bool,
        allow_post_cache: bool,
    ) -> Result<(), CacheError> {
        if !self.should_cache(method, status, body, cacheable, allow_post_cache) {
            debug!(method, url, status, "response not cacheable, skipping store");
            return Ok(());
        }
        let now = now_unix();
        let ttl = self.ttl_for(url);
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = now + ttl.as_secs() as i64;
        let headers_json = serde_json::to_string(headers)?;

        sqlx::query(
            "INSERT INTO cache_entries (method, url, status, headers_json, body, stored_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(method, url) DO UPDATE SET \
               status = excluded.status, headers_json = excluded.headers_json, \
               body = excluded.body, stored_at = excluded.stored_at, expires_at = excluded.expires_at",
        )
        .bind(method)
        .bind(url)
        .bind(i64::from(status))
        .bind(headers_json)
        .bind(body)
        .bind(now)
        .bind(expires_at)
        .execute(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }

    /// Forces a fresh fetch next time by evicting any cached entry (the
    /// `bust=true` call path).
    pub async fn evict(&self, method: &str, url: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE method = ? AND url = ?")
            .bind(method)
            .bind(url)
            .execute(self.db.pool())
            .await
            .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }

    /// Prunes all entries past their `expires_at`. Run once at startup.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, CacheError> {
        let now = now_unix();
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await
            .map_err(crate::db::DbError::Connection)?;
        let reaped = result.rows_affected();
        if reaped > 0 {
            debug!(reaped, "swept expired cache entries");
        }
        Ok(reaped)
    }

    fn should_cache(
        &self,
        method: &str,
        status: u16,
        body: &[u8],
        cacheable: bool,
        allow_post_cache: bool,
    ) -> bool {
        if !cacheable {
            return false;
        }
        if !CACHEABLE_STATUSES.contains(&status) {
            return false;
        }
        if !method.eq_ignore_ascii_case("get") && !(method.eq_ignore_ascii_case("post") && allow_post_cache) {
            return false;
        }
        if crate::challenge::looks_like_challenge(body) {
            return false;
        }
        true
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HashMap<String, String> {
        HashMap::from([("content-type".to_string(), "text/html".to_string())])
    }

    #[tokio::test]
    async fn caches_and_returns_200() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        cache
            .put("GET", "https://x.test/a", 200, &headers(), b"hi", true, false)
            .await
            .unwrap();
        let hit = cache.get("GET", "https://x.test/a").await.unwrap().unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, b"hi");
    }

    #[tokio::test]
    async fn refuses_uncacheable_status() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        cache
            .put("GET", "https://x.test/a", 500, &headers(), b"err", true, false)
            .await
            .unwrap();
        assert!(cache.get("GET", "https://x.test/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refuses_when_caller_marks_non_cacheable() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        cache
            .put("GET", "https://x.test/a", 200, &headers(), b"hi", false, false)
            .await
            .unwrap();
        assert!(cache.get("GET", "https://x.test/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_is_not_cached_unless_explicitly_enabled() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        cache
            .put("POST", "https://x.test/a", 200, &headers(), b"hi", true, false)
            .await
            .unwrap();
        assert!(cache.get("POST", "https://x.test/a").await.unwrap().is_none());

        cache
            .put("POST", "https://x.test/b", 200, &headers(), b"hi", true, true)
            .await
            .unwrap();
        assert!(cache.get("POST", "https://x.test/b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn evict_forces_a_miss() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        cache
            .put("GET", "https://x.test/a", 200, &headers(), b"hi", true, false)
            .await
            .unwrap();
        cache.evict("GET", "https://x.test/a").await.unwrap();
        assert!(cache.get("GET", "https://x.test/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn does_not_cache_challenge_bodies() {
        let cache = RequestCache::open_in_memory().await.unwrap();
        let body = b"<html>Checking your browser before accessing... cloudflare</html>";
        cache
            .put("GET", "https://x.test/a", 200, &headers(), body, true, false)
            .await
            .unwrap();
        assert!(cache.get("GET", "https://x.test/a").await.unwrap().is_none());
    }
}
