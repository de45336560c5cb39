//! URL filtering.

use std::collections::HashSet;

use url::Url;

/// Filtering configuration, populated from CLI/config at startup.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Hosts to always drop, regardless of `only_hosts`.
    pub blocked_hosts: HashSet<String>,
    /// If non-empty, only these hosts are allowed through.
    pub only_hosts: HashSet<String>,
    /// Hosts to drop for this run only (distinct list from `blocked_hosts`
    /// so a persistent blocklist and a one-off `--skip-hosts` compose).
    pub skip_hosts: HashSet<String>,
    /// Inclusive lower bound on `completed_after`, Unix seconds.
    pub completed_after: Option<i64>,
    /// Inclusive upper bound on `completed_before`, Unix seconds.
    pub completed_before: Option<i64>,
}

/// Why a URL was dropped during filtering, for the unsupported/skip logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The URL failed to parse as an absolute http(s) URL.
    Malformed,
    /// Already seen earlier in this same run.
    DuplicateThisRun,
    /// Host is in `blocked_hosts`.
    BlockedHost,
    /// Host is in `skip_hosts`.
    SkippedHost,
    /// `only_hosts` is non-empty and this host isn't in it.
    NotInAllowlist,
}

/// Tracks URLs already seen this run, for the `DuplicateThisRun` check.
/// Separate from the persistent history store: "seen this run" is a
/// run-local concept, C6's `temp_referer_seen` covers the persisted case.
#[derive(Debug, Default)]
pub struct SeenThisRun {
    seen: HashSet<String>,
}

impl SeenThisRun {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url` as seen, returning `true` if it was already present.
    pub fn mark(&mut self, url: &str) -> bool {
        !self.seen.insert(url.to_string())
    }
}

/// Decides whether `url` survives filtering.
/// `seen` must be queried and updated by the caller in a single pass over
/// the input so duplicates within the same batch are caught.
pub fn classify(url: &str, config: &FilterConfig, seen: &mut SeenThisRun) -> Result<(), DropReason> {
    let Ok(parsed) = Url::parse(url) else {
        return Err(DropReason::Malformed);
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(DropReason::Malformed);
    }
    let Some(host) = parsed.host_str() else {
        return Err(DropReason::Malformed);
    };
    let host = host.to_ascii_lowercase();

    if seen.mark(url) {
        return Err(DropReason::DuplicateThisRun);
    }
    if config.blocked_hosts.contains(&host) {
        return Err(DropReason::BlockedHost);
    }
    if config.skip_hosts.contains(&host) {
        return Err(DropReason::SkippedHost);
    }
    if !config.only_hosts.is_empty() && !config.only_hosts.contains(&host) {
        return Err(DropReason::NotInAllowlist);
    }
    Ok(())
}

/// True if `completed_at` falls within `[completed_after, completed_before]`
/// (each bound inclusive, `None` meaning unbounded on that side).
#[must_use]
pub fn within_date_range(completed_at: i64, config: &FilterConfig) -> bool {
    if let Some(after) = config.completed_after {
        if completed_at < after {
            return false;
        }
    }
    if let Some(before) = config.completed_before {
        if completed_at > before {
            return false;
        }
    }
    true
}
