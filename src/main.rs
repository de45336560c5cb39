//! CLI entry point for the downloader tool.

use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, warn};

use cratewalker_core::{
    auth::cookies::parse_netscape_cookies, ChallengeSolver, ClientConfig, CookieStore,
    DispatchStats, Dispatcher, DownloadEngine, EngineConfig, FilterConfig, GovernorConfig,
    HistoryStore, HttpClient, RateGovernor, RequestCache, ScraperRegistry,
};

mod cli;

use cli::{parse_date_bound, Args};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("cratewalker starting");

    if args.multiconfig {
        warn!("--multiconfig accepted for CLI-surface compatibility; this build only runs one config");
    }

    let app_storage = args
        .app_storage
        .clone()
        .or_else(|| dirs::data_dir().map(|d| d.join("cratewalker")))
        .ok_or_else(|| anyhow!("could not resolve a platform data directory; pass --app-storage"))?;

    let cache_dir = app_storage.join("Cache");
    let cookies_dir = app_storage.join("Cookies");
    for dir in [&cache_dir, &cookies_dir, &app_storage.join("Configs"), &app_storage.join("Logs")] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let history = Arc::new(
        HistoryStore::open(&cache_dir.join("cyberdrop.db"))
            .await
            .context("opening history store")?,
    );
    let request_cache = Arc::new(
        RequestCache::open(
            &cache_dir.join("request_cache.db"),
            Duration::from_secs(7 * 24 * 3600),
            Duration::from_secs(28 * 24 * 3600),
        )
        .await
        .context("opening request cache")?,
    );
    let governor = Arc::new(RateGovernor::new(GovernorConfig::default()));

    let cookie_store = CookieStore::new();
    seed_cookies(&cookie_store, &cookies_dir).await;

    let user_agent = concat!("cratewalker/", env!("CARGO_PKG_VERSION")).to_string();
    let challenge = Arc::new(ChallengeSolver::new(None, user_agent.clone(), None));

    let http = HttpClient::new(
        ClientConfig {
            user_agent: user_agent.clone(),
            ..ClientConfig::default()
        },
        Arc::clone(&request_cache),
        Arc::clone(&governor),
        cookie_store.clone(),
        Arc::clone(&challenge),
    )
    .context("building HTTP client")?;

    let engine = Arc::new(
        DownloadEngine::new(
            cookie_store.clone(),
            Arc::clone(&governor),
            Arc::clone(&history),
            EngineConfig::default(),
        )
        .context("building download engine")?,
    );

    let registry = Arc::new(ScraperRegistry::new());

    let (downloads_tx, mut downloads_rx) = unbounded_channel();

    let filter = FilterConfig {
        completed_before: args
            .completed_before
            .as_deref()
            .map(parse_date_bound)
            .transpose()
            .map_err(|e| anyhow!(e))?,
        completed_after: args
            .completed_after
            .as_deref()
            .map(parse_date_bound)
            .transpose()
            .map_err(|e| anyhow!(e))?,
        ..FilterConfig::default()
    };

    let dispatcher = Arc::new(Dispatcher::new(
        http,
        Arc::clone(&registry),
        Arc::clone(&history),
        downloads_tx,
        None,
        filter,
        args.concurrency as usize,
        args.output_dir.clone(),
        None,
    ));

    let items = if args.retry_failed {
        dispatcher.load_retry_failed().await.context("loading failed items")?
    } else if args.retry_all {
        let after = args.completed_after.as_deref().map(parse_date_bound).transpose().map_err(|e| anyhow!(e))?;
        let before = args.completed_before.as_deref().map(parse_date_bound).transpose().map_err(|e| anyhow!(e))?;
        dispatcher
            .load_retry_all(after, before)
            .await
            .context("loading completed items for retry")?
    } else if args.retry_maintenance {
        let site = args
            .retry_maintenance_site
            .clone()
            .ok_or_else(|| anyhow!("--retry-maintenance requires --retry-maintenance-site"))?;
        dispatcher
            .load_retry_maintenance(&site)
            .await
            .context("loading maintenance candidates")?
    } else {
        let mut inputs = cratewalker_core::parse_link_args(&args.links);
        if let Some(path) = &args.input_file {
            inputs.extend(
                dispatcher
                    .load_input_file(path)
                    .await
                    .context("reading input file")?,
            );
        }
        if inputs.is_empty() {
            info!("no input provided; pass --links or --input-file");
            return Ok(());
        }
        let stats = DispatchStats::default();
        dispatcher.prepare_items(&inputs, &stats)
    };

    let items = if let Some(limit) = args.max_items_retry {
        items.into_iter().take(limit).collect::<Vec<_>>()
    } else {
        items
    };

    if items.is_empty() {
        info!("nothing to do");
        return Ok(());
    }

    let worker_engine = Arc::clone(&engine);
    let worker = tokio::spawn(async move {
        while let Some(item) = downloads_rx.recv().await {
            let engine = Arc::clone(&worker_engine);
            tokio::spawn(async move {
                if let Err(err) = engine.download(item).await {
                    warn!(error = %err, "download failed");
                }
            });
        }
    });

    let ctrlc_dispatcher = Arc::clone(&dispatcher);
    let ctrlc_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; finishing in-flight work");
            ctrlc_dispatcher.shut_down();
        }
    });

    let stats = dispatcher.run(items).await;
    ctrlc_handle.abort();
    drop(dispatcher);
    let _ = worker.await;

    info!(
        scraped_ok = stats.scraped_ok(),
        scraped_failed = stats.scraped_failed(),
        unsupported = stats.unsupported(),
        filtered = stats.filtered(),
        "run complete"
    );

    Ok(())
}

/// Loads every `Cookies/<site>.txt` Netscape-format dump into the shared
/// jar. A malformed file is logged and skipped rather than aborting
/// startup.
async fn seed_cookies(cookie_store: &CookieStore, cookies_dir: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(cookies_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not open cookie file");
                continue;
            }
        };
        match parse_netscape_cookies(BufReader::new(file)) {
            Ok(result) => {
                for (line, reason) in &result.warnings {
                    warn!(path = %path.display(), line, reason, "malformed cookie line");
                }
                cookie_store.seed(&result.cookies).await;
                debug!(path = %path.display(), count = result.cookies.len(), "seeded cookies");
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse cookie file");
            }
        }
    }
}
