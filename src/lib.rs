//! Cratewalker Core Library
//!
//! Core engine for a concurrent, multi-site media scraper and downloader:
//! a site-agnostic dispatcher walks `ScrapeItem`s through pluggable
//! per-site scrapers, funnels discovered files through a resumable
//! Download Engine, and de-duplicates against a persistent history store.
//!
//! # Architecture
//!
//! The library is organized into the following modules, one per component
//! in the design (`C1`-`C9`):
//! - [`client`] - HTTP Client Layer (C1): retries, backoff, challenge
//!   routing
//! - [`cache`] - Request Cache (C2)
//! - [`governor`] - Rate Governor (C3): token buckets, concurrency caps,
//!   byte-rate shaping
//! - [`auth`] - Cookie Store (C4)
//! - [`challenge`] - Challenge Solver Adapter (C5)
//! - [`history`] - History/Dedup Store (C6)
//! - [`download`] - Download Engine (C7): resumable transfers, atomic
//!   rename
//! - [`scrape`] - Site-Scraper Interface (C8)
//! - [`dispatch`] - Dispatcher/Scheduler (C9): input loading, filtering,
//!   routing, fan-out
//! - [`db`] - Shared SQLite connection management
//! - [`error`] - Crate-level error aggregation
//! - [`ext`] - Non-goal trait seams (`ExternalMediaTool`, `NotifierSink`)
//!   with no-op defaults

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod cache;
pub mod challenge;
pub mod client;
pub mod db;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod ext;
pub mod governor;
pub mod history;
pub mod scrape;

pub use auth::cookie_store::CookieStore;
pub use cache::{CacheError, HostClass, RequestCache};
pub use challenge::{ChallengeError, ChallengeSolver, SolvedPage, SolverCookie};
pub use client::{ClientConfig, ClientError, HttpClient, HttpResponse, TlsVerification};
pub use db::{Database, DbError};
pub use dispatch::{
    classify, parse_input_text, parse_link_args, within_date_range, DispatchError,
    DispatchStats, Dispatcher, DropReason, FilterConfig, InputUrl, RouteDecision, RunningGate,
    SeenThisRun,
};
pub use download::{
    sanitize_component, DownloadEngine, DownloadItem, DownloadOutcome, EngineConfig, EngineError,
};
pub use error::CoreError;
pub use ext::{
    ExternalDownloadManager, ExternalDownloadManagerError, ExternalMediaTool, ExternalToolError,
    NoExternalDownloadManager, NoMediaTool, NoNotifier, NotifierSink, RunSummary,
};
pub use governor::{DownloadPermit, GovernorConfig, RateGovernor};
pub use history::{FailedEntry, HistoryEntry, HistoryError, HistoryRecord, HistoryStore};
pub use scrape::{
    ItemType, MaxChildrenReached, ScrapeError, ScrapeItem, Scraper, ScraperContext,
    ScraperRegistry,
};
