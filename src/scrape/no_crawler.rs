//! `DirectFileScraper`: the `no_crawler` pseudo-scraper.
//!
//! Serves as the reference implementation of the [`super::Scraper`] contract
//! and the fallback for bare media URLs the dispatcher recognizes by
//! extension but that no registered scraper claims.

use async_trait::async_trait;
use url::Url;

use crate::download::{download_subfolder, DownloadItem};
use crate::scrape::{ScrapeError, ScrapeItem, Scraper, ScraperContext};

/// Treats `item.url` itself as the single file to download: no page
/// fetch, no child items, no pagination. Filename is the last path
/// segment, percent-decoded.
pub struct DirectFileScraper {
    download_root: std::path::PathBuf,
}

impl DirectFileScraper {
    /// Builds the scraper; `download_root` is the base directory under
    /// which `download_subfolder`-derived subdirectories are created.
    #[must_use]
    pub fn new(download_root: std::path::PathBuf) -> Self {
        Self { download_root }
    }
}

#[async_trait]
impl Scraper for DirectFileScraper {
    fn domain(&self) -> &str {
        "no_crawler"
    }

    fn primary_base_domain(&self) -> &str {
        "no_crawler"
    }

    fn supported_sites(&self) -> &[&str] {
        &[]
    }

    async fn fetch(&self, item: ScrapeItem, ctx: ScraperContext) -> Result<(), ScrapeError> {
        if ctx
            .check_complete_from_referer(self.domain(), &item.referer)
            .await?
        {
            return Ok(());
        }

        let parsed = Url::parse(&item.url)
            .map_err(|e| ScrapeError::UnexpectedShape {
                url: item.url.clone(),
                reason: format!("not a valid URL: {e}"),
            })?;

        let filename = parsed
            .path_segments()
            .and_then(std::iter::Iterator::last)
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()).unwrap_or_else(|_| segment.to_string()))
            .ok_or_else(|| ScrapeError::UnexpectedShape {
                url: item.url.clone(),
                reason: "URL has no path segment to use as a filename".to_string(),
            })?;

        let subfolder = download_subfolder(item.part_of_album, &item.parent_title, ctx.folder_domain());
        let download_folder = self.download_root.join(subfolder);

        let mut download = DownloadItem::new(
            self.domain(),
            item.url.clone(),
            item.referer.clone(),
            download_folder,
            filename,
        );
        download.album_id = item.album_id.clone();
        download.datetime = item.possible_datetime;
        download.parents = item.parents.clone();

        ctx.handle_file(download);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_context() -> (ScraperContext, tokio::sync::mpsc::UnboundedReceiver<DownloadItem>) {
        let (tx, rx) = unbounded_channel();
        let rt = tokio::runtime::Handle::current();
        let history = rt.block_on(async {
            Arc::new(
                crate::history::HistoryStore::open_in_memory()
                    .await
                    .expect("in-memory history store"),
            )
        });
        let cache = rt.block_on(async {
            Arc::new(
                crate::cache::RequestCache::open_in_memory()
                    .await
                    .expect("in-memory cache"),
            )
        });
        let governor = Arc::new(crate::governor::RateGovernor::new(
            crate::governor::GovernorConfig::default(),
        ));
        let cookies = crate::auth::cookie_store::CookieStore::new();
        let challenge = Arc::new(crate::challenge::ChallengeSolver::new(
            None,
            "test-agent".to_string(),
            None,
        ));
        let http = crate::client::HttpClient::new(
            crate::client::ClientConfig::default(),
            cache,
            governor,
            cookies,
            challenge,
        )
        .expect("http client");
        (ScraperContext::new(http, history, tx, "no_crawler"), rx)
    }

    #[tokio::test]
    async fn emits_a_download_item_for_the_bare_url() {
        let (ctx, mut rx) = test_context();
        let scraper = DirectFileScraper::new(std::path::PathBuf::from("/tmp/downloads"));
        let item = ScrapeItem::new("https://cdn.example.com/files/photo.jpg");

        scraper.fetch(item, ctx).await.expect("fetch succeeds");

        let download = rx.try_recv().expect("one download item emitted");
        assert_eq!(download.filename, "photo.jpg");
        assert_eq!(download.source_url, "https://cdn.example.com/files/photo.jpg");
    }

    #[tokio::test]
    async fn rejects_a_url_with_no_path_segment() {
        let (ctx, _rx) = test_context();
        let scraper = DirectFileScraper::new(std::path::PathBuf::from("/tmp/downloads"));
        let item = ScrapeItem::new("https://cdn.example.com");

        let result = scraper.fetch(item, ctx).await;
        assert!(result.is_err());
    }
}
