//! Concurrent download worker: pre-flight dedup check, free-space check,
//! range-resume probe, streamed transfer under the byte-rate shaper,
//! atomic rename, and bounded retry.
//!
//! Built on `download/client.rs` (HEAD-probe resume detection, `Range`
//! header construction, streaming-to-file with cleanup-on-error) and
//! `download/engine.rs` (semaphore-gated concurrent processing, per-item
//! retry loop), generalized to this crate's `DownloadItem`/`HistoryStore`
//! data model and `RateGovernor` byte shaper.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE, REFERER};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::error::EngineError;
use super::DownloadItem;
use crate::auth::CookieStore;
use crate::governor::RateGovernor;
use crate::history::{HistoryRecord, HistoryStore};

/// Minimum bytes the free-space preflight ever requires, even if
/// `required_free_space` is configured lower.
const MIN_FREE_SPACE_FLOOR: u64 = 512 * 1024 * 1024;

/// Why a `DownloadItem` did not result in a fresh transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Transferred and written to `complete_path`.
    Completed {
        /// Final file size in bytes.
        filesize: u64,
    },
    /// `is_complete` already returned true; no network work done.
    PreviouslyCompleted,
    /// Matched a configured skip filter (host, regex, extension).
    Skipped {
        /// Human-readable reason.
        reason: String,
    },
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum free bytes required at `download_folder`, clamped to
    /// [`MIN_FREE_SPACE_FLOOR`].
    pub required_free_space: u64,
    /// Maximum attempts for a single download (`download_attempts`).
    pub download_attempts: u32,
    /// User-Agent sent on download requests.
    pub user_agent: String,
    /// Whether to compute and record a SHA-256 hash in the history row.
    pub compute_hash: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_free_space: MIN_FREE_SPACE_FLOOR,
            download_attempts: 5,
            user_agent: concat!("cratewalker/", env!("CARGO_PKG_VERSION")).to_string(),
            compute_hash: true,
        }
    }
}

/// Download Engine (C7).
pub struct DownloadEngine {
    client: Client,
    governor: Arc<RateGovernor>,
    history: Arc<HistoryStore>,
    config: EngineConfig,
    /// At-most-once-per-(site,url) in-flight guard.
    in_flight: DashMap<(String, String), ()>,
    /// Per-`complete_path` mutex, so two workers never open the same
    /// destination file concurrently.
    path_locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine").finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Builds an engine sharing the cookie jar with the rest of the client
    /// stack (so authenticated sessions carry over to downloads).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Client`] if the underlying `reqwest::Client`
    /// fails to build.
    pub fn new(
        cookies: CookieStore,
        governor: Arc<RateGovernor>,
        history: Arc<HistoryStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .cookie_provider(cookies.jar())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| crate::client::ClientError::Network {
                url: "<download client builder>".to_string(),
                source,
            })?;
        Ok(Self {
            client,
            governor,
            history,
            config,
            in_flight: DashMap::new(),
            path_locks: DashMap::new(),
        })
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(lock) = self.path_locks.get(path) {
            return Arc::clone(&lock);
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        self.path_locks.insert(path.to_path_buf(), Arc::clone(&lock));
        lock
    }

    /// Runs the full download algorithm for one item.
    #[instrument(skip(self, item), fields(site = %item.site, url = %item.source_url))]
    pub async fn download(&self, mut item: DownloadItem) -> Result<DownloadOutcome, EngineError> {
        let key = (item.site.clone(), item.source_url.clone());
        if self.in_flight.contains_key(&key) {
            return Ok(DownloadOutcome::Skipped {
                reason: "already in flight this process".to_string(),
            });
        }
        self.in_flight.insert(key.clone(), ());
        let result = self.download_inner(&mut item).await;
        self.in_flight.remove(&key);
        result
    }

    async fn download_inner(&self, item: &mut DownloadItem) -> Result<DownloadOutcome, EngineError> {
        if self.history.is_complete(&item.site, &item.source_url).await? {
            debug!("already completed; skipping");
            return Ok(DownloadOutcome::PreviouslyCompleted);
        }

        let complete_path = item.complete_path();
        let partial_path = item.partial_path();
        tokio::fs::create_dir_all(&item.download_folder)
            .await
            .map_err(|source| EngineError::Io {
                path: item.download_folder.clone(),
                source,
            })?;

        self.check_free_space(&item.download_folder).await?;

        let path_lock = self.path_lock(&complete_path);
        let _guard = path_lock.lock().await;

        let _permit = self.governor.acquire_download_slot(item.fetch_url()).await;

        let mut last_error = None;
        for attempt in 1..=self.config.download_attempts {
            item.attempt = attempt;
            match self.attempt_download(item, &partial_path, &complete_path).await {
                Ok((filesize, content_hash)) => {
                    self.history
                        .mark_complete(&HistoryRecord {
                            site: item.site.clone(),
                            url_path: item.source_url.clone(),
                            referer_path: Some(item.referer.clone()),
                            album_id: item.album_id.clone(),
                            filename: item.filename.clone(),
                            filesize: filesize as i64,
                            content_hash,
                        })
                        .await?;
                    return Ok(DownloadOutcome::Completed { filesize });
                }
                Err(
                    err @ (EngineError::ZeroLength { .. }
                    | EngineError::Client(crate::client::ClientError::PermanentHttp { .. })),
                ) => {
                    self.record_failure(item, &err).await;
                    return Err(err);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "download attempt failed, retrying");
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(EngineError::ZeroLength {
            url: item.fetch_url().to_string(),
        });
        self.record_failure(item, &err).await;
        Err(err)
    }

    /// Writes a `failed_items` row so `retry_failed` can re-enqueue this
    /// item later. Best-effort: a history-store failure here must not mask
    /// the original download error.
    async fn record_failure(&self, item: &DownloadItem, err: &EngineError) {
        if let Err(history_err) = self
            .history
            .mark_failed(
                &item.site,
                &item.source_url,
                Some(&item.referer),
                item.album_id.as_deref(),
                &err.to_string(),
            )
            .await
        {
            warn!(error = %history_err, "failed to record download failure in history store");
        }
    }

    /// One HEAD-probe + streamed-GET attempt. Returns the final file size
    /// and, when `compute_hash` is set, the hex-encoded SHA-256 of the
    /// bytes written this attempt (resumed ranges are not rehashed, so a
    /// resumed download's hash only covers the newly fetched tail).
    async fn attempt_download(
        &self,
        item: &DownloadItem,
        partial_path: &Path,
        complete_path: &Path,
    ) -> Result<(u64, Option<String>), EngineError> {
        let url = item.fetch_url();
        let existing = tokio::fs::metadata(partial_path).await.ok().map(|m| m.len()).unwrap_or(0);

        let (expected_total, supports_ranges) = self.probe(url).await;

        if let Some(total) = expected_total {
            if total == 0 {
                return Err(EngineError::ZeroLength { url: url.to_string() });
            }
            if existing > total {
                debug!(existing, total, "partial larger than server length; discarding");
                let _ = tokio::fs::remove_file(partial_path).await;
            }
        }

        let resume_from = if supports_ranges { existing.min(expected_total.unwrap_or(u64::MAX)) } else { 0 };
        if !supports_ranges && existing > 0 {
            let _ = tokio::fs::remove_file(partial_path).await;
        }

        let mut request = self.client.get(url).header(REFERER, item.referer.clone());
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = request.send().await.map_err(|source| crate::client::ClientError::Network {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 || status.as_u16() == 451 {
            return Err(EngineError::Client(crate::client::ClientError::PermanentHttp {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(EngineError::Client(crate::client::ClientError::PermanentHttp {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }

        let used_range = status.as_u16() == 206;
        let base_offset = if used_range { resume_from } else { 0 };

        let mut file = if used_range {
            let mut handle = OpenOptions::new()
                .create(true)
                .write(true)
                .open(partial_path)
                .await
                .map_err(|source| EngineError::Io { path: partial_path.to_path_buf(), source })?;
            handle
                .seek(std::io::SeekFrom::Start(base_offset))
                .await
                .map_err(|source| EngineError::Io { path: partial_path.to_path_buf(), source })?;
            handle
        } else {
            File::create(partial_path)
                .await
                .map_err(|source| EngineError::Io { path: partial_path.to_path_buf(), source })?
        };

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|len| base_offset + len)
            .or(expected_total);

        let mut hasher = Sha256::new();
        let mut writer = BufWriter::new(&mut file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = base_offset;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| crate::client::ClientError::Network {
                url: url.to_string(),
                source,
            })?;
            self.governor.acquire_bytes(chunk.len() as u64).await;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| EngineError::Io { path: partial_path.to_path_buf(), source })?;
            if self.config.compute_hash {
                hasher.update(&chunk);
            }
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|source| EngineError::Io { path: partial_path.to_path_buf(), source })?;
        file.sync_all().await.map_err(|source| EngineError::Io {
            path: partial_path.to_path_buf(),
            source,
        })?;

        if let Some(expected) = content_length {
            if written != expected {
                let _ = tokio::fs::remove_file(partial_path).await;
                return Err(EngineError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    actual: written,
                });
            }
        }

        tokio::fs::rename(partial_path, complete_path)
            .await
            .map_err(|source| EngineError::Io { path: complete_path.to_path_buf(), source })?;

        if let Some(mtime) = item.datetime {
            set_mtime(complete_path, mtime);
        }

        let content_hash = self.config.compute_hash.then(|| hex_digest(&hasher.finalize()));

        info!(bytes = written, path = %complete_path.display(), "download complete");
        Ok((written, content_hash))
    }

    /// HEAD probe for `Content-Length` and `Accept-Ranges: bytes`.
    async fn probe(&self, url: &str) -> (Option<u64>, bool) {
        let Ok(response) = self.client.head(url).send().await else {
            return (None, false);
        };
        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let supports_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        (total, supports_ranges)
    }

    async fn check_free_space(&self, folder: &Path) -> Result<(), EngineError> {
        let needed = self.config.required_free_space.max(MIN_FREE_SPACE_FLOOR);
        let available = available_space(folder);
        if available < needed {
            return Err(EngineError::InsufficientSpace {
                path: folder.to_path_buf(),
                needed,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(not(test))]
fn available_space(folder: &Path) -> u64 {
    use sysinfo::Disks;
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if folder.starts_with(mount) {
            let depth = mount.components().count();
            if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                best = Some((depth, disk.available_space()));
            }
        }
    }
    best.map(|(_, avail)| avail).unwrap_or(u64::MAX)
}

#[cfg(test)]
fn available_space(_folder: &Path) -> u64 {
    u64::MAX
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn set_mtime(path: &Path, unix_seconds: i64) {
    let time = std::time::UNIX_EPOCH + Duration::from_secs(unix_seconds.max(0) as u64);
    if let Err(err) = filetime_set(path, time) {
        warn!(path = %path.display(), error = %err, "failed to set mtime from possible_datetime");
    }
}

fn filetime_set(path: &Path, time: std::time::SystemTime) -> std::io::Result<()> {
    let file = std::fs::File::open(path)?;
    file.set_modified(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::GovernorConfig;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path as match_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_engine() -> DownloadEngine {
        let cookies = CookieStore::new();
        let governor = Arc::new(RateGovernor::new(GovernorConfig {
            capacity: 1000,
            period: Duration::from_millis(1),
            ..GovernorConfig::default()
        }));
        let history = Arc::new(HistoryStore::open_in_memory().await.unwrap());
        DownloadEngine::new(cookies, governor, history, EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn downloads_a_small_file() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "5"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(match_path("/f.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = test_engine().await;
        let url = format!("{}/f.bin", server.uri());
        let item = DownloadItem::new("site_a", &url, &url, dir.path().to_path_buf(), "f.bin");

        let outcome = engine.download(item.clone()).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed { filesize: 5 });
        assert!(dir.path().join("f.bin").exists());
        assert!(engine.history.is_complete("site_a", &url).await.unwrap());

        let rows = engine.history.fetch_all_items(None, None).await.unwrap();
        let row = rows.iter().find(|r| r.url_path == url).expect("history row for this download");
        assert_eq!(
            row.content_hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"),
            "sha256(\"hello\") should be recorded when compute_hash is enabled"
        );
    }

    #[tokio::test]
    async fn previously_completed_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = test_engine().await;
        let url = format!("{}/f.bin", server.uri());
        engine
            .history
            .mark_complete(&HistoryRecord {
                site: "site_a".to_string(),
                url_path: url.clone(),
                referer_path: None,
                album_id: None,
                filename: "f.bin".to_string(),
                filesize: 1,
                content_hash: None,
            })
            .await
            .unwrap();

        let item = DownloadItem::new("site_a", &url, &url, dir.path().to_path_buf(), "f.bin");
        let outcome = engine.download(item).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::PreviouslyCompleted);
    }

    #[tokio::test]
    async fn zero_length_is_a_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = test_engine().await;
        let url = format!("{}/empty.bin", server.uri());
        let item = DownloadItem::new("site_a", &url, &url, dir.path().to_path_buf(), "empty.bin");

        let err = engine.download(item).await.unwrap_err();
        assert!(matches!(err, EngineError::ZeroLength { .. }));
        assert!(!dir.path().join("empty.bin").exists());
    }

    #[tokio::test]
    async fn completed_path_invariants_hold() {
        let dir = TempDir::new().unwrap();
        let item = DownloadItem::new("site_a", "https://x.test/a", "https://x.test", dir.path().to_path_buf(), "f.bin");
        assert_eq!(item.partial_path(), item.complete_path().with_extension("bin.part"));
        assert_eq!(item.complete_path().parent().unwrap(), dir.path());
        assert_eq!(item.partial_path().parent().unwrap(), dir.path());
    }
}
