//! CLI argument definitions.

use clap::Parser;

/// Concurrent multi-site media scraper and downloader.
#[derive(Parser, Debug)]
#[command(name = "cratewalker")]
#[command(author, version, about)]
pub struct Args {
    /// One or more URLs to scrape/download (repeatable).
    #[arg(long = "links", num_args = 0..)]
    pub links: Vec<String>,

    /// Path to an input file.
    #[arg(long = "input-file")]
    pub input_file: Option<std::path::PathBuf>,

    /// Re-enqueue everything in the failed-items log.
    #[arg(long, conflicts_with_all = ["retry_all", "retry_maintenance"])]
    pub retry_failed: bool,

    /// Re-enqueue every completed item within the date range.
    #[arg(long, conflicts_with_all = ["retry_failed", "retry_maintenance"])]
    pub retry_all: bool,

    /// Re-enqueue completed items whose content hash matches a registered
    /// known-bad placeholder.
    #[arg(long, conflicts_with_all = ["retry_failed", "retry_all"])]
    pub retry_maintenance: bool,

    /// Site domain to scope `--retry-maintenance` to.
    #[arg(long, requires = "retry_maintenance")]
    pub retry_maintenance_site: Option<String>,

    /// Only include items completed on or before this date (YYYY-MM-DD).
    #[arg(long)]
    pub completed_before: Option<String>,

    /// Only include items completed on or after this date (YYYY-MM-DD).
    #[arg(long)]
    pub completed_after: Option<String>,

    /// Cap the number of items a retry mode re-enqueues.
    #[arg(long)]
    pub max_items_retry: Option<usize>,

    /// Load multiple named configs in one run (out of core scope; accepted
    /// for CLI-surface compatibility and currently a no-op beyond logging).
    #[arg(long)]
    pub multiconfig: bool,

    /// Skip any interactive UI and run straight to completion.
    #[arg(long)]
    pub download: bool,

    /// Destination directory for downloaded files.
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: std::path::PathBuf,

    /// Base directory for persisted state (Cache/, Cookies/, Configs/,
    /// Logs/). Defaults to the platform data directory when unset.
    #[arg(long)]
    pub app_storage: Option<std::path::PathBuf>,

    /// Maximum concurrent scrape tasks.
    #[arg(short = 'c', long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub concurrency: u32,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Parses `YYYY-MM-DD` into Unix seconds at midnight UTC.
pub fn parse_date_bound(value: &str) -> Result<i64, String> {
    let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date {value:?}: {e}"))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date {value:?}"))?;
    Ok(datetime.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_parse_successfully() {
        let args = Args::try_parse_from(["cratewalker"]).unwrap();
        assert!(args.links.is_empty());
        assert!(!args.retry_failed);
        assert_eq!(args.concurrency, 10);
    }

    #[test]
    fn retry_modes_are_mutually_exclusive() {
        let result = Args::try_parse_from(["cratewalker", "--retry-failed", "--retry-all"]);
        assert!(result.is_err());
    }

    #[test]
    fn links_accepts_multiple_values() {
        let args = Args::try_parse_from([
            "cratewalker",
            "--links",
            "https://a.test/1",
            "https://b.test/2",
        ])
        .unwrap();
        assert_eq!(args.links.len(), 2);
    }

    #[test]
    fn parses_a_valid_date_bound() {
        assert!(parse_date_bound("2026-01-15").is_ok());
    }

    #[test]
    fn rejects_a_malformed_date_bound() {
        assert!(parse_date_bound("not-a-date").is_err());
    }
}
