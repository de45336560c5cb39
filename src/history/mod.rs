//! History/Dedup Store (C6): a transactional record of attempted and
//! completed downloads keyed by `(site, canonical-URL)`.
//!
//! Built on the same query-filter struct + `FromRow` read model shape as
//! `queue/history.rs` (`sqlx::query_as`), with a single `download_log`
//! table split into `history` / `album_membership` / `failed_items` /
//! `maintenance_hashes` / `temp_referer_seen`.

mod error;

pub use error::HistoryError;

use sqlx::{FromRow, Row};
use tracing::{debug, instrument};

use crate::db::Database;

/// A completed-download record, as written by the Download Engine (C7).
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    /// Scraper domain identifier.
    pub site: String,
    /// Canonical URL path (scheme+host stripped; see [`canonicalize`]).
    pub url_path: String,
    /// Referer URL path at creation time, if any.
    pub referer_path: Option<String>,
    /// Album id this item belongs to, if any.
    pub album_id: Option<String>,
    /// Final filename on disk.
    pub filename: String,
    /// Final file size in bytes.
    pub filesize: i64,
    /// Content hash (e.g. SHA-256 hex), if computed.
    pub content_hash: Option<String>,
}

/// A row read back from the `history` table.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryEntry {
    /// Row id.
    pub id: i64,
    /// Scraper domain identifier.
    pub site: String,
    /// Canonical URL path.
    pub url_path: String,
    /// Referer URL path, if recorded.
    pub referer_path: Option<String>,
    /// Album id, if any.
    pub album_id: Option<String>,
    /// Filename on disk.
    pub filename: String,
    /// File size in bytes.
    pub filesize: i64,
    /// Content hash, if recorded.
    pub content_hash: Option<String>,
    /// Unix seconds the item was marked complete.
    pub completed_at: i64,
}

/// A row read back from the `failed_items` table, for `retry_failed`.
#[derive(Debug, Clone, FromRow)]
pub struct FailedEntry {
    /// Row id.
    pub id: i64,
    /// Scraper domain identifier.
    pub site: String,
    /// Canonical URL path that failed.
    pub url_path: String,
    /// Referer URL path, if recorded.
    pub referer_path: Option<String>,
    /// Album id, if any.
    pub album_id: Option<String>,
    /// Error message recorded at failure time.
    pub error: String,
    /// Unix seconds the failure was recorded.
    pub failed_at: i64,
}

/// Transactional history store (C6). Cheap to clone: the pool inside
/// [`Database`] is itself an `Arc`.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    /// Opens the history database at `db_path`, running migrations and
    /// clearing the temp-referer table.
    pub async fn open(db_path: &std::path::Path) -> Result<Self, HistoryError> {
        let db = Database::open(db_path).await?;
        sqlx::migrate!("./migrations/history")
            .run(db.pool())
            .await
            .map_err(crate::db::DbError::Migration)?;
        let store = Self { db };
        store.clear_temp_referers().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, HistoryError> {
        let db = Database::open_in_memory().await?;
        sqlx::migrate!("./migrations/history")
            .run(db.pool())
            .await
            .map_err(crate::db::DbError::Migration)?;
        Ok(Self { db })
    }

    /// True if `(site, canonical_url)` has a completed history row.
    #[instrument(skip(self))]
    pub async fn is_complete(&self, site: &str, canonical_url: &str) -> Result<bool, HistoryError> {
        let url_path = canonicalize(canonical_url);
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM history WHERE site = ? AND url_path = ? LIMIT 1",
        )
        .bind(site)
        .bind(&url_path)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(row.is_some())
    }

    /// True if `(site, referer_url)` was seen as a `referer_path` on a
    /// completed row — the `check_complete_from_referer` short-circuit
    /// scrapers call before doing network work.
    #[instrument(skip(self))]
    pub async fn is_complete_by_referer(
        &self,
        site: &str,
        referer_url: &str,
    ) -> Result<bool, HistoryError> {
        let referer_path = canonicalize(referer_url);
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM history WHERE site = ? AND referer_path = ? LIMIT 1",
        )
        .bind(site)
        .bind(&referer_path)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(row.is_some())
    }

    /// Records `record` as complete. Atomic: either the row and its album
    /// membership (if any) are fully written, or neither is, via a single
    /// SQLite transaction.
    #[instrument(skip(self, record), fields(site = %record.site, url = %record.url_path))]
    pub async fn mark_complete(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let url_path = canonicalize(&record.url_path);
        let referer_path = record.referer_path.as_deref().map(canonicalize);
        let now = now_unix();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(crate::db::DbError::Connection)?;

        let inserted = sqlx::query(
            "INSERT INTO history (site, url_path, referer_path, album_id, filename, filesize, content_hash, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(site, url_path) DO UPDATE SET \
               referer_path = excluded.referer_path, album_id = excluded.album_id, \
               filename = excluded.filename, filesize = excluded.filesize, \
               content_hash = excluded.content_hash, completed_at = excluded.completed_at \
             RETURNING id",
        )
        .bind(&record.site)
        .bind(&url_path)
        .bind(&referer_path)
        .bind(&record.album_id)
        .bind(&record.filename)
        .bind(record.filesize)
        .bind(&record.content_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(crate::db::DbError::Connection)?;
        let history_id: i64 = inserted.try_get("id").unwrap_or(0);

        if let Some(album_id) = &record.album_id {
            sqlx::query(
                "INSERT OR IGNORE INTO album_membership (site, album_id, history_id) VALUES (?, ?, ?)",
            )
            .bind(&record.site)
            .bind(album_id)
            .bind(history_id)
            .execute(&mut *tx)
            .await
            .map_err(crate::db::DbError::Connection)?;
        }

        sqlx::query("DELETE FROM failed_items WHERE site = ? AND url_path = ?")
            .bind(&record.site)
            .bind(&url_path)
            .execute(&mut *tx)
            .await
            .map_err(crate::db::DbError::Connection)?;

        tx.commit().await.map_err(crate::db::DbError::Connection)?;
        debug!(site = %record.site, url_path, "marked complete");
        Ok(())
    }

    /// Records `url` as a failure for `site`, available via
    /// [`Self::fetch_failed_items`] for `retry_failed`.
    #[instrument(skip(self, error))]
    pub async fn mark_failed(
        &self,
        site: &str,
        url: &str,
        referer: Option<&str>,
        album_id: Option<&str>,
        error: &str,
    ) -> Result<(), HistoryError> {
        let url_path = canonicalize(url);
        let referer_path = referer.map(canonicalize);
        let now = now_unix();
        sqlx::query(
            "INSERT INTO failed_items (site, url_path, referer_path, album_id, error, failed_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(site, url_path) DO UPDATE SET \
               referer_path = excluded.referer_path, album_id = excluded.album_id, \
               error = excluded.error, failed_at = excluded.failed_at",
        )
        .bind(site)
        .bind(&url_path)
        .bind(&referer_path)
        .bind(album_id)
        .bind(error)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }

    /// All rows currently recorded as failed (`retry_failed` input source).
    #[instrument(skip(self))]
    pub async fn fetch_failed_items(&self) -> Result<Vec<FailedEntry>, HistoryError> {
        let rows = sqlx::query_as::<_, FailedEntry>(
            "SELECT id, site, url_path, referer_path, album_id, error, failed_at \
             FROM failed_items ORDER BY failed_at ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(rows)
    }

    /// All completed rows within `[after, before]` Unix-seconds bounds
    /// (`retry_all` input source). `None` bounds are unbounded on that side.
    #[instrument(skip(self))]
    pub async fn fetch_all_items(
        &self,
        after: Option<i64>,
        before: Option<i64>,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            "SELECT id, site, url_path, referer_path, album_id, filename, filesize, content_hash, completed_at \
             FROM history \
             WHERE (?1 IS NULL OR completed_at >= ?1) AND (?2 IS NULL OR completed_at <= ?2) \
             ORDER BY completed_at ASC",
        )
        .bind(after)
        .bind(before)
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(rows)
    }

    /// Completed rows for `site` whose `content_hash` matches a registered
    /// maintenance placeholder (`retry_maintenance` input source).
    #[instrument(skip(self))]
    pub async fn fetch_maintenance_candidates(
        &self,
        site: &str,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            "SELECT h.id, h.site, h.url_path, h.referer_path, h.album_id, h.filename, \
                    h.filesize, h.content_hash, h.completed_at \
             FROM history h \
             JOIN maintenance_hashes m ON m.site = h.site AND m.content_hash = h.content_hash \
             WHERE h.site = ?",
        )
        .bind(site)
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(rows)
    }

    /// Registers a content hash as a known-bad placeholder for `site`,
    /// consulted by [`Self::fetch_maintenance_candidates`].
    pub async fn register_maintenance_hash(
        &self,
        site: &str,
        content_hash: &str,
    ) -> Result<(), HistoryError> {
        sqlx::query("INSERT OR IGNORE INTO maintenance_hashes (site, content_hash) VALUES (?, ?)")
            .bind(site)
            .bind(content_hash)
            .execute(self.db.pool())
            .await
            .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }

    /// Records that `referer` was seen this run, for the
    /// `skip_referer_seen_before` optimization.
    pub async fn note_referer_seen(&self, site: &str, referer: &str) -> Result<(), HistoryError> {
        let referer_path = canonicalize(referer);
        sqlx::query("INSERT OR IGNORE INTO temp_referer_seen (site, referer_path) VALUES (?, ?)")
            .bind(site)
            .bind(&referer_path)
            .execute(self.db.pool())
            .await
            .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }

    /// True if `referer` was already noted via [`Self::note_referer_seen`]
    /// earlier in this run.
    pub async fn referer_seen_this_run(&self, site: &str, referer: &str) -> Result<bool, HistoryError> {
        let referer_path = canonicalize(referer);
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM temp_referer_seen WHERE site = ? AND referer_path = ? LIMIT 1",
        )
        .bind(site)
        .bind(&referer_path)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::db::DbError::Connection)?;
        Ok(row.is_some())
    }

    /// Clears the temp-referer table. Called once at startup.
    async fn clear_temp_referers(&self) -> Result<(), HistoryError> {
        sqlx::query("DELETE FROM temp_referer_seen")
            .execute(self.db.pool())
            .await
            .map_err(crate::db::DbError::Connection)?;
        Ok(())
    }
}

/// Strips scheme and host, keeping path+query, so the history key is
/// insensitive to `http` vs `https` and to which mirror host served a page.
/// `%`-encoded segments are preserved verbatim.
fn canonicalize(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut out = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Err(_) => url.to_string(),
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

    fn record(site: &str, url: &str) -> HistoryRecord {
        HistoryRecord {
            site: site.to_string(),
            url_path: url.to_string(),
            referer_path: None,
            album_id: None,
            filename: "file.bin".to_string(),
            filesize: 1024,
            content_hash: None,
        }
    }

    #[tokio::test]
    async fn mark_complete_then_is_complete() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        assert!(!store.is_complete("site_a", "https://x.test/a").await.unwrap());
        store.mark_complete(&record("site_a", "https://x.test/a")).await.unwrap();
        assert!(store.is_complete("site_a", "https://x.test/a").await.unwrap());
        assert!(store.is_complete("site_a", "https://mirror.test/a").await.unwrap());
    }

    #[tokio::test]
    async fn mark_complete_clears_prior_failure() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store
            .mark_failed("site_a", "https://x.test/a", None, None, "boom")
            .await
            .unwrap();
        assert_eq!(store.fetch_failed_items().await.unwrap().len(), 1);
        store.mark_complete(&record("site_a", "https://x.test/a")).await.unwrap();
        assert_eq!(store.fetch_failed_items().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn album_membership_is_recorded() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let mut rec = record("site_a", "https://x.test/a");
        rec.album_id = Some("ABC123".to_string());
        store.mark_complete(&rec).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM album_membership WHERE album_id = 'ABC123'")
            .fetch_one(store.db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn referer_short_circuit() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let mut rec = record("site_a", "https://x.test/a");
        rec.referer_path = Some("https://x.test/album/1".to_string());
        store.mark_complete(&rec).await.unwrap();
        assert!(
            store
                .is_complete_by_referer("site_a", "https://x.test/album/1")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn fetch_all_items_respects_date_range() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store.mark_complete(&record("site_a", "https://x.test/a")).await.unwrap();
        let now = now_unix();
        assert_eq!(store.fetch_all_items(Some(now - 10), Some(now + 10)).await.unwrap().len(), 1);
        assert_eq!(store.fetch_all_items(Some(now + 10), None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn maintenance_candidates_match_registered_hash() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let mut rec = record("site_a", "https://x.test/a");
        rec.content_hash = Some("deadbeef".to_string());
        store.mark_complete(&rec).await.unwrap();
        store.register_maintenance_hash("site_a", "deadbeef").await.unwrap();
        let rows = store.fetch_maintenance_candidates("site_a").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn temp_referer_seen_tracks_within_a_run() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        assert!(!store.referer_seen_this_run("site_a", "https://x.test/r").await.unwrap());
        store.note_referer_seen("site_a", "https://x.test/r").await.unwrap();
        assert!(store.referer_seen_this_run("site_a", "https://x.test/r").await.unwrap());
    }

    #[tokio::test]
    async fn canonicalize_preserves_percent_encoding() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store
            .mark_complete(&record("site_a", "https://x.test/a%20b/c"))
            .await
            .unwrap();
        assert!(store.is_complete("site_a", "https://x.test/a%20b/c").await.unwrap());
    }
}
