//! Dispatcher/Scheduler (C9): input loading, filtering, routing, fan-out,
//! and retry-mode input sources.
//!
//! Built on `resolver::ResolverRegistry::resolve_to_url`'s priority loop
//! for the routing/fallback-chain shape, and on
//! `download/engine.rs`'s semaphore-gated `tokio::spawn` fan-out
//! (`process_queue_interruptible_with_options`) for task scheduling,
//! generalized from "one task per queue row" to "one task per `ScrapeItem`"
//! with routing interposed beforehand.

mod error;
mod filter;
pub mod input;

pub use error::DispatchError;
pub use filter::{classify, within_date_range, DropReason, FilterConfig, SeenThisRun};
pub use input::{parse_input_text, parse_link_args, InputUrl};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{info, instrument, warn};
use url::Url;

use crate::client::HttpClient;
use crate::download::DownloadItem;
use crate::ext::ExternalDownloadManager;
use crate::history::HistoryStore;
use crate::scrape::{ScrapeItem, Scraper, ScraperContext, ScraperRegistry};

/// Extensions the dispatcher treats as "valid media" for the `no_crawler`
/// fallback route.
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "heic", "mp4", "mkv", "mov", "avi", "webm",
    "wmv", "m4v", "mp3", "flac", "wav", "m4a", "ogg", "zip", "rar", "7z", "pdf",
];

/// Where a routed URL ends up, following the scraper/media-extension/
/// fallback chain.
pub enum RouteDecision {
    /// A registered scraper claims this host.
    Scraper(Arc<dyn Scraper>),
    /// No scraper claims it, but it has a recognized media extension.
    NoCrawler,
    /// No scraper, no recognized extension, but an external download
    /// manager is configured to take unsupported links off the dispatcher's
    /// hands.
    ExternalDownloadManager,
    /// No scraper and no extension, but a generic fallback scraper is
    /// configured.
    Fallback(Arc<dyn Scraper>),
    /// Nothing can handle this URL.
    Unsupported,
}

/// Process-wide pause/resume gate: a single running flag gates every
/// component's waits. Cloning shares the same gate.
#[derive(Clone)]
pub struct RunningGate {
    tx: Arc<watch::Sender<bool>>,
}

impl RunningGate {
    /// Creates a gate that starts in the running state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Pauses the gate; every `wait` call blocks until [`Self::resume`].
    pub fn pause(&self) {
        let _ = self.tx.send(false);
    }

    /// Resumes the gate.
    pub fn resume(&self) {
        let _ = self.tx.send(true);
    }

    /// Suspends the caller until the gate is in the running state. A no-op
    /// if already running.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for RunningGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one [`Dispatcher::run`] invocation.
#[derive(Debug, Default)]
pub struct DispatchStats {
    scraped_ok: AtomicUsize,
    scraped_failed: AtomicUsize,
    unsupported: AtomicUsize,
    filtered: AtomicUsize,
}

impl DispatchStats {
    /// Number of `ScrapeItem`s whose `fetch` returned `Ok`.
    #[must_use]
    pub fn scraped_ok(&self) -> usize {
        self.scraped_ok.load(Ordering::Relaxed)
    }

    /// Number of `ScrapeItem`s whose `fetch` returned `Err`.
    #[must_use]
    pub fn scraped_failed(&self) -> usize {
        self.scraped_failed.load(Ordering::Relaxed)
    }

    /// Number of URLs routed to `Unsupported`.
    #[must_use]
    pub fn unsupported(&self) -> usize {
        self.unsupported.load(Ordering::Relaxed)
    }

    /// Number of URLs dropped during filtering.
    #[must_use]
    pub fn filtered(&self) -> usize {
        self.filtered.load(Ordering::Relaxed)
    }
}

/// The Dispatcher/Scheduler (C9): owns input loading, filtering, routing,
/// and the scrape-task fan-out pool.
pub struct Dispatcher {
    http: HttpClient,
    registry: Arc<ScraperRegistry>,
    history: Arc<HistoryStore>,
    downloads: tokio::sync::mpsc::UnboundedSender<DownloadItem>,
    fallback: Option<Arc<dyn Scraper>>,
    filter: FilterConfig,
    max_concurrency: usize,
    running: RunningGate,
    shutting_down: Arc<AtomicBool>,
    /// Base directory `no_crawler` downloads land under, since the
    /// pseudo-scraper has no registered `primary_base_domain` of its own
    /// to derive one from.
    download_root: PathBuf,
    /// Remote download manager links fall through to when nothing else
    /// claims them. `None` means this seam is disabled, not merely unused.
    external_download_manager: Option<Arc<dyn ExternalDownloadManager>>,
}

impl Dispatcher {
    /// Builds a dispatcher. `fallback` is the generic scraper used when a
    /// URL has neither a registered scraper nor a recognized media
    /// extension; pass `None` to disable it.
    /// `download_root` is the `--output-dir` base the `no_crawler`
    /// pseudo-scraper writes under. `external_download_manager` is the
    /// `route`/`run` fallback tried before giving up on a link with
    /// neither a registered scraper nor a recognized media extension; pass
    /// `None` to disable it.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: HttpClient,
        registry: Arc<ScraperRegistry>,
        history: Arc<HistoryStore>,
        downloads: tokio::sync::mpsc::UnboundedSender<DownloadItem>,
        fallback: Option<Arc<dyn Scraper>>,
        filter: FilterConfig,
        max_concurrency: usize,
        download_root: PathBuf,
        external_download_manager: Option<Arc<dyn ExternalDownloadManager>>,
    ) -> Self {
        Self {
            http,
            registry,
            history,
            downloads,
            fallback,
            filter,
            max_concurrency: max_concurrency.max(1),
            running: RunningGate::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            download_root,
            external_download_manager,
        }
    }

    /// The shared pause/resume gate; clone and hand to other components
    /// (C3, C7) that need to suspend at `RUNNING`'s next poll interval.
    #[must_use]
    pub fn running_gate(&self) -> RunningGate {
        self.running.clone()
    }

    /// Signals shutdown: sets `SHUTTING_DOWN` so [`Self::run`] stops
    /// claiming new work and returns once in-flight tasks finish.
    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Routes `url` to a scraper, the `no_crawler` pseudo-site, an external
    /// download manager, a generic fallback, or `Unsupported`, in that
    /// order.
    #[must_use]
    pub fn route(&self, url: &str) -> RouteDecision {
        if let Some(scraper) = self.registry.route(url) {
            return RouteDecision::Scraper(scraper);
        }
        if has_media_extension(url) {
            return RouteDecision::NoCrawler;
        }
        if self.external_download_manager.is_some() {
            return RouteDecision::ExternalDownloadManager;
        }
        match &self.fallback {
            Some(scraper) => RouteDecision::Fallback(Arc::clone(scraper)),
            None => RouteDecision::Unsupported,
        }
    }

    /// Parses a batch of tagged input URLs into `ScrapeItem`s, applying
    /// filtering. Dropped URLs are logged, not
    /// returned.
    #[must_use]
    pub fn prepare_items(&self, inputs: &[InputUrl], stats: &DispatchStats) -> Vec<ScrapeItem> {
        let mut seen = SeenThisRun::new();
        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            if let Err(reason) = classify(&input.url, &self.filter, &mut seen) {
                stats.filtered.fetch_add(1, Ordering::Relaxed);
                warn!(url = %input.url, reason = ?reason, "dropped during filtering");
                continue;
            }
            let mut item = ScrapeItem::new(input.url.clone());
            if let Some(title) = &input.group_title {
                item.parent_title = title.clone();
            }
            items.push(item);
        }
        items
    }

    /// Builds retry-mode items from `retry_failed`.
    pub async fn load_retry_failed(&self) -> Result<Vec<ScrapeItem>, DispatchError> {
        let rows = self.history.fetch_failed_items().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let base = self.registry.find_by_domain(&row.site)?;
                let mut item = ScrapeItem::new(format!(
                    "https://{}{}",
                    base.primary_base_domain(),
                    row.url_path
                ));
                item.retry = true;
                item.album_id = row.album_id;
                Some(item)
            })
            .collect())
    }

    /// Builds retry-mode items from `retry_all` within a date range.
    pub async fn load_retry_all(
        &self,
        after: Option<i64>,
        before: Option<i64>,
    ) -> Result<Vec<ScrapeItem>, DispatchError> {
        let rows = self.history.fetch_all_items(after, before).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let base = self.registry.find_by_domain(&row.site)?;
                let mut item = ScrapeItem::new(format!(
                    "https://{}{}",
                    base.primary_base_domain(),
                    row.url_path
                ));
                item.retry = true;
                item.album_id = row.album_id;
                Some(item)
            })
            .collect())
    }

    /// Builds retry-mode items from `retry_maintenance` for `site`.
    pub async fn load_retry_maintenance(&self, site: &str) -> Result<Vec<ScrapeItem>, DispatchError> {
        let rows = self.history.fetch_maintenance_candidates(site).await?;
        let Some(base) = self.registry.find_by_domain(site) else {
            warn!(site, "retry_maintenance requested for an unregistered site");
            return Ok(Vec::new());
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut item =
                    ScrapeItem::new(format!("https://{}{}", base.primary_base_domain(), row.url_path));
                item.retry = true;
                item.album_id = row.album_id;
                item
            })
            .collect())
    }

    /// Reads and parses an input file from `path`.
    pub async fn load_input_file(&self, path: &Path) -> Result<Vec<InputUrl>, DispatchError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DispatchError::InputFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(parse_input_text(&text))
    }

    /// Routes and runs `items` to completion, fanning tasks out up to
    /// `max_concurrency`. Per-site concurrency is left
    /// to C3 inside each scraper's own HTTP calls. A single item's failure
    /// is logged and counted, never propagated: it never terminates the run.
    #[instrument(skip(self, items))]
    pub async fn run(&self, items: Vec<ScrapeItem>) -> DispatchStats {
        let stats = Arc::new(DispatchStats::default());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            self.running.wait().await;

            let decision = self.route(&item.url);
            let scraper = match decision {
                RouteDecision::Scraper(s) | RouteDecision::Fallback(s) => s,
                RouteDecision::NoCrawler => {
                    // `no_crawler` has no host claims, so it is never reached
                    // via `ScraperRegistry::route`; the dispatcher invokes it
                    // directly as a synthetic scraper.
                    Arc::new(crate::scrape::no_crawler::DirectFileScraper::new(
                        self.download_root.clone(),
                    ))
                }
                RouteDecision::ExternalDownloadManager => {
                    let mgr = self
                        .external_download_manager
                        .as_ref()
                        .expect("route only returns this variant when configured");
                    match mgr.send(&item.url, &item.parent_title).await {
                        Ok(()) => {
                            stats.scraped_ok.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            stats.scraped_failed.fetch_add(1, Ordering::Relaxed);
                            warn!(url = %item.url, error = %err, "external download manager rejected link");
                        }
                    }
                    continue;
                }
                RouteDecision::Unsupported => {
                    stats.unsupported.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %item.url, "no scraper, extension, or fallback claims this URL");
                    continue;
                }
            };

            let ctx = ScraperContext::new(
                self.http.clone(),
                Arc::clone(&self.history),
                self.downloads.clone(),
                scraper.folder_domain().to_string(),
            );
            let permit = Arc::clone(&semaphore).acquire_owned().await;
            let Ok(permit) = permit else { break };
            let stats = Arc::clone(&stats);
            let url = item.url.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match scraper.fetch(item, ctx).await {
                    Ok(()) => {
                        stats.scraped_ok.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        stats.scraped_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(url = %url, error = %err, "scrape failed");
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!(
            scraped_ok = stats.scraped_ok(),
            scraped_failed = stats.scraped_failed(),
            unsupported = stats.unsupported(),
            filtered = stats.filtered(),
            "dispatch run complete"
        );

        // Every clone handed to a spawned task is dropped once that task's
        // future resolves; having awaited all handles above, this is the
        // only remaining reference.
        Arc::try_unwrap(stats).unwrap_or_else(|arc| DispatchStats {
            scraped_ok: AtomicUsize::new(arc.scraped_ok()),
            scraped_failed: AtomicUsize::new(arc.scraped_failed()),
            unsupported: AtomicUsize::new(arc.unsupported()),
            filtered: AtomicUsize::new(arc.filtered()),
        })
    }
}

/// True if `url`'s path ends in a recognized media extension.
fn has_media_extension(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(segment) = parsed.path_segments().and_then(std::iter::Iterator::last) else {
        return false;
    };
    let Some(ext) = Path::new(segment).extension() else {
        return false;
    };
    MEDIA_EXTENSIONS.contains(&ext.to_string_lossy().to_ascii_lowercase().as_str())
}
