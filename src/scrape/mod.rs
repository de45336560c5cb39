//! Site-Scraper Interface (C8): the contract concrete per-site scrapers
//! implement. Only the contract and a reference
//! `DirectFileScraper` (the `no_crawler` pseudo-scraper) live here; actual
//! per-site extraction logic is out of scope.
//!
//! Built on `resolver::{Resolver, ResolverRegistry}`'s trait/registry
//! split (`async_trait` object-safe trait + priority-ordered dispatch),
//! generalized to host-suffix routing and the `ScrapeItem` lifecycle:
//! dynamic dispatch over resolver modules becomes an explicit
//! scraper-registration table.

mod error;
mod item;
pub mod no_crawler;
mod registry;

pub use error::ScrapeError;
pub use item::{ItemType, MaxChildrenReached, ScrapeItem};
pub use registry::ScraperRegistry;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::client::HttpClient;
use crate::download::DownloadItem;
use crate::history::HistoryStore;

/// Everything a [`Scraper`] needs to do its work without touching disk,
/// the history store, or the HTTP client directly: scrapers must not
/// perform their own disk I/O, and must emit output only through the
/// provided `handle_file`. Cheap to clone.
#[derive(Clone)]
pub struct ScraperContext {
    http: HttpClient,
    history: std::sync::Arc<HistoryStore>,
    downloads: UnboundedSender<DownloadItem>,
    folder_domain: String,
}

impl ScraperContext {
    /// Builds a context for one scraper instance.
    #[must_use]
    pub fn new(
        http: HttpClient,
        history: std::sync::Arc<HistoryStore>,
        downloads: UnboundedSender<DownloadItem>,
        folder_domain: impl Into<String>,
    ) -> Self {
        Self {
            http,
            history,
            downloads,
            folder_domain: folder_domain.into(),
        }
    }

    /// The HTTP client layer, for scrapers that need to fetch pages beyond
    /// [`Self::fetch_page`]'s convenience wrapper.
    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fetches a page through C1 (cache/rate/cookies/challenge all apply).
    pub async fn fetch_page(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let response = self.http.get(url, true).await?;
        Ok(response.body)
    }

    /// Short-circuits already-completed items by referer, so a scraper can
    /// skip network work entirely when possible.
    pub async fn check_complete_from_referer(
        &self,
        site: &str,
        referer: &str,
    ) -> Result<bool, ScrapeError> {
        Ok(self.history.is_complete_by_referer(site, referer).await?)
    }

    /// Emits a finished unit of work to the Download Engine. The only way a
    /// scraper is permitted to produce output.
    pub fn handle_file(&self, item: DownloadItem) {
        let _ = self.downloads.send(item);
    }

    /// The human-readable folder-domain name for this scraper, used by
    /// [`crate::download::download_subfolder`] for loose-file placement.
    #[must_use]
    pub fn folder_domain(&self) -> &str {
        &self.folder_domain
    }
}

/// The per-site contract. Implementors register
/// themselves with a [`ScraperRegistry`] at startup; the registry, not the
/// scraper, owns URL routing.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Stable identifier used in logs, the history store key, and folder
    /// naming.
    fn domain(&self) -> &str;

    /// Human-readable variant of [`Self::domain`] for on-disk folder names.
    fn folder_domain(&self) -> &str {
        self.domain()
    }

    /// The canonical origin URL for this site.
    fn primary_base_domain(&self) -> &str;

    /// Host suffixes this scraper claims. The registry routes a URL to the
    /// scraper with the longest matching suffix.
    fn supported_sites(&self) -> &[&str];

    /// Walks the page(s) reachable from `item`, emitting `DownloadItem`s via
    /// `ctx.handle_file`. Scrapers MUST create any child `ScrapeItem`s via
    /// [`ScrapeItem::create_child`] so attribution is preserved, and MUST
    /// NOT perform their own disk I/O.
    async fn fetch(&self, item: ScrapeItem, ctx: ScraperContext) -> Result<(), ScrapeError>;
}
