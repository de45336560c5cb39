//! Download Engine (C7): resumable file transfers, temp files, atomic
//! rename, speed shaping, retries.
//!
//! Built on `download/client.rs`'s range-resume handling and
//! `download/engine.rs`'s semaphore-gated concurrent processing loop,
//! generalized to byte-rate shaping, history-store dedup, and free-space
//! preflight.

pub mod engine;
mod error;
mod filename;

pub use engine::{DownloadEngine, DownloadOutcome, EngineConfig};
pub use error::EngineError;
pub use filename::sanitize_component;

use std::path::{Path, PathBuf};

/// A unit of download work, derived from a [`crate::scrape::ScrapeItem`].
#[derive(Debug, Clone)]
pub struct DownloadItem {
    /// Site/scraper domain identifier, used as the history-store key prefix.
    pub site: String,
    /// The media URL to GET.
    pub source_url: String,
    /// The `ScrapeItem`'s URL at creation time, sent as the HTTP Referer.
    pub referer: String,
    /// Absolute destination directory.
    pub download_folder: PathBuf,
    /// Destination filename (already sanitized).
    pub filename: String,
    /// The original, pre-dedup filename as seen on the server/page.
    pub original_filename: String,
    /// File extension, including the leading dot.
    pub extension: String,
    /// Alternate, directly-downloadable URL from a link-unlocker service.
    /// When present the engine fetches this instead of `source_url`, but
    /// `source_url` remains the history-store identity key.
    pub debrid_link: Option<String>,
    /// Album id this item belongs to, if any.
    pub album_id: Option<String>,
    /// `possible_datetime` from the originating `ScrapeItem`, used for mtime.
    pub datetime: Option<i64>,
    /// Ancestor URLs, carried through for attribution.
    pub parents: Vec<String>,
    /// Retry counter, incremented by the engine on each re-attempt.
    pub attempt: u32,
}

impl DownloadItem {
    /// Builds a `DownloadItem`, deriving `complete_path`/`partial_path`
    /// deterministically: `complete_path =
    /// download_folder / filename`, `partial_path = complete_path + ".part"`.
    #[must_use]
    pub fn new(
        site: impl Into<String>,
        source_url: impl Into<String>,
        referer: impl Into<String>,
        download_folder: PathBuf,
        filename: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let extension = Path::new(&filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        Self {
            site: site.into(),
            source_url: source_url.into(),
            referer: referer.into(),
            download_folder,
            original_filename: filename.clone(),
            filename,
            extension,
            debrid_link: None,
            album_id: None,
            datetime: None,
            parents: Vec::new(),
            attempt: 0,
        }
    }

    /// The URL the engine actually fetches: `debrid_link` if present,
    /// otherwise `source_url` (GLOSSARY: "Debrid link").
    #[must_use]
    pub fn fetch_url(&self) -> &str {
        self.debrid_link.as_deref().unwrap_or(&self.source_url)
    }

    /// `download_folder / filename`.
    #[must_use]
    pub fn complete_path(&self) -> PathBuf {
        self.download_folder.join(&self.filename)
    }

    /// `complete_path` with a trailing `.part`.
    #[must_use]
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self.complete_path().into_os_string();
        name.push(".part");
        PathBuf::from(name)
    }
}

/// Computes the on-disk subdirectory for an item:
/// `<parent_title>` when part of an album, otherwise
/// `"Loose Files (<folder_domain>)"`.
#[must_use]
pub fn download_subfolder(part_of_album: bool, parent_title: &str, folder_domain: &str) -> String {
    if part_of_album && !parent_title.is_empty() {
        filename::sanitize_component(parent_title, filename::MAX_FOLDER_LEN)
    } else {
        format!("Loose Files ({folder_domain})")
    }
}
