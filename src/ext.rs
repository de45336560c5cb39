//! Injection points for functionality this crate intentionally does not
//! implement: JS-challenge rendering beyond C5, video post-processing,
//! forwarding to a remote download manager, and notification dispatch.
//! Each is a narrow trait with a no-op default so the core runs
//! standalone; a full product wires a real impl in.

use async_trait::async_trait;
use std::path::Path;

/// External media post-processing (transcoding, concatenating segmented
/// video parts, thumbnail extraction). The download engine never needs
/// this to complete a transfer; it's an optional post-step.
#[async_trait]
pub trait ExternalMediaTool: Send + Sync {
    /// Processes a completed download at `path`, in place. Errors are
    /// logged by the caller and never roll back the download itself.
    async fn process(&self, path: &Path) -> Result<(), ExternalToolError>;
}

/// Error from an [`ExternalMediaTool`] invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExternalToolError {
    /// No tool is configured; the no-op default always returns this.
    #[error("no external media tool configured")]
    NotConfigured,
    /// The external tool process failed.
    #[error("external tool failed: {0}")]
    ToolFailed(String),
}

/// A no-op tool: every call is a `NotConfigured` error, never a panic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMediaTool;

#[async_trait]
impl ExternalMediaTool for NoMediaTool {
    async fn process(&self, _path: &Path) -> Result<(), ExternalToolError> {
        Err(ExternalToolError::NotConfigured)
    }
}

/// Forwards a link the dispatcher has no scraper and no extension match
/// for to a remote download manager instead of giving up on it. The
/// dispatcher never retries or downloads these itself; once handed off,
/// the link is the remote manager's problem.
#[async_trait]
pub trait ExternalDownloadManager: Send + Sync {
    /// Hands `url` (with `title` for folder/grouping context) to the
    /// remote manager's queue.
    async fn send(&self, url: &str, title: &str) -> Result<(), ExternalDownloadManagerError>;
}

/// Error from an [`ExternalDownloadManager`] invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExternalDownloadManagerError {
    /// No manager is configured; the no-op default always returns this.
    #[error("no external download manager configured")]
    NotConfigured,
    /// The remote manager rejected the link.
    #[error("external download manager rejected the link: {0}")]
    Rejected(String),
}

/// A no-op manager: every call is a `NotConfigured` error, never a panic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalDownloadManager;

#[async_trait]
impl ExternalDownloadManager for NoExternalDownloadManager {
    async fn send(&self, _url: &str, _title: &str) -> Result<(), ExternalDownloadManagerError> {
        Err(ExternalDownloadManagerError::NotConfigured)
    }
}

/// A run-completion event a [`NotifierSink`] can forward.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Count of items that completed successfully.
    pub scraped_ok: usize,
    /// Count of items whose scrape failed.
    pub scraped_failed: usize,
    /// Count of unsupported URLs.
    pub unsupported: usize,
}

/// Notification dispatch (Discord/Slack/email webhooks, desktop toasts).
/// Kept separate from `tracing` output: logs are for operators tailing a
/// file, notifications are for someone who isn't watching.
#[async_trait]
pub trait NotifierSink: Send + Sync {
    /// Sends `summary` to wherever this sink reports. The no-op default
    /// drops it silently.
    async fn notify(&self, summary: &RunSummary);
}

/// A no-op sink: every notification is dropped silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNotifier;

#[async_trait]
impl NotifierSink for NoNotifier {
    async fn notify(&self, _summary: &RunSummary) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_media_tool_always_reports_not_configured() {
        let tool = NoMediaTool;
        let err = tool.process(Path::new("/tmp/x")).await.unwrap_err();
        assert!(matches!(err, ExternalToolError::NotConfigured));
    }

    #[tokio::test]
    async fn no_external_download_manager_always_reports_not_configured() {
        let mgr = NoExternalDownloadManager;
        let err = mgr.send("https://example.com/a", "title").await.unwrap_err();
        assert!(matches!(err, ExternalDownloadManagerError::NotConfigured));
    }

    #[tokio::test]
    async fn no_notifier_accepts_and_drops_everything() {
        let sink = NoNotifier;
        sink.notify(&RunSummary {
            scraped_ok: 1,
            scraped_failed: 0,
            unsupported: 0,
        })
        .await;
    }
}
