//! Scraper registration and URL routing.
//!
//! Built on `resolver::ResolverRegistry`'s shape: a flat
//! `Vec<Box<dyn Trait>>` built once at startup, searched on every lookup.
//! Unlike that priority-ordered list, routing here picks the scraper
//! whose longest registered host suffix matches the URL's host.

use std::sync::Arc;

use url::Url;

use super::Scraper;

/// Holds every registered [`Scraper`] and answers "who handles this URL".
pub struct ScraperRegistry {
    scrapers: Vec<Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scrapers: Vec::new(),
        }
    }

    /// Registers a scraper. Order does not affect routing (longest-suffix
    /// wins regardless of registration order), only iteration order when
    /// suffixes tie, in which case the earliest-registered wins.
    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.push(scraper);
    }

    /// Finds the scraper whose `supported_sites()` contains the longest
    /// host suffix matching `url`'s host. Returns `None` if no scraper
    /// claims it (the dispatcher then falls back to `no_crawler` or logs it
    /// unsupported).
    #[must_use]
    pub fn route(&self, url: &str) -> Option<Arc<dyn Scraper>> {
        let host = Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();

        let mut best: Option<(usize, &Arc<dyn Scraper>)> = None;
        for scraper in &self.scrapers {
            for suffix in scraper.supported_sites() {
                let suffix = suffix.to_ascii_lowercase();
                if host_matches_suffix(&host, &suffix) {
                    let better = match best {
                        Some((len, _)) => suffix.len() > len,
                        None => true,
                    };
                    if better {
                        best = Some((suffix.len(), scraper));
                    }
                }
            }
        }
        best.map(|(_, scraper)| Arc::clone(scraper))
    }

    /// Finds the scraper registered under `domain` (its `Scraper::domain()`
    /// value), irrespective of host-suffix routing. Used to reconstruct a
    /// full URL from a history-store row's `(site, url_path)` pair via
    /// [`Scraper::primary_base_domain`] for the dispatcher's retry modes.
    #[must_use]
    pub fn find_by_domain(&self, domain: &str) -> Option<Arc<dyn Scraper>> {
        self.scrapers
            .iter()
            .find(|s| s.domain() == domain)
            .map(Arc::clone)
    }

    /// Every registered scraper, in registration order.
    #[must_use]
    pub fn scrapers(&self) -> &[Arc<dyn Scraper>] {
        &self.scrapers
    }
}

impl Default for ScraperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `host` equals `suffix` or ends with `.{suffix}`, so `images.x.com`
/// matches a scraper registered for `x.com` but `evilx.com` does not.
fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::scrape::{ScrapeError, ScrapeItem, ScraperContext};

    struct Fake {
        domain: &'static str,
        sites: Vec<&'static str>,
    }

    #[async_trait]
    impl Scraper for Fake {
        fn domain(&self) -> &str {
            self.domain
        }

        fn primary_base_domain(&self) -> &str {
            self.domain
        }

        fn supported_sites(&self) -> &[&str] {
            &self.sites
        }

        async fn fetch(&self, _item: ScrapeItem, _ctx: ScraperContext) -> Result<(), ScrapeError> {
            Ok(())
        }
    }

    #[test]
    fn routes_to_longest_matching_suffix() {
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(Fake {
            domain: "generic",
            sites: vec!["com"],
        }));
        registry.register(Arc::new(Fake {
            domain: "specific",
            sites: vec!["images.example.com"],
        }));

        let routed = registry.route("https://cdn.images.example.com/a.jpg").unwrap();
        assert_eq!(routed.domain(), "specific");
    }

    #[test]
    fn does_not_match_unrelated_subdomain_spoof() {
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(Fake {
            domain: "x",
            sites: vec!["x.com"],
        }));

        assert!(registry.route("https://evilx.com/a").is_none());
    }

    #[test]
    fn unmatched_url_returns_none() {
        let registry = ScraperRegistry::new();
        assert!(registry.route("https://nowhere.test/a").is_none());
    }

    #[test]
    fn finds_by_domain_identifier() {
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(Fake {
            domain: "example",
            sites: vec!["example.com"],
        }));
        assert!(registry.find_by_domain("example").is_some());
        assert!(registry.find_by_domain("nope").is_none());
    }
}
