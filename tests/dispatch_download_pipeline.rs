//! End-to-end test wiring the dispatcher, the `no_crawler` fallback route,
//! and the download engine together against a mock HTTP server.

use std::sync::Arc;

use cratewalker_core::{
    CookieStore, DispatchStats, Dispatcher, DownloadEngine, EngineConfig, FilterConfig,
    GovernorConfig, HistoryStore, HttpClient, RateGovernor, RequestCache, ScraperRegistry,
};
use tempfile::TempDir;
use tokio::sync::mpsc::unbounded_channel;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn bare_media_url_flows_through_dispatch_and_lands_on_disk() {
    let server = MockServer::start().await;
    let content = b"binary payload";
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", content.len().to_string()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(&server)
        .await;

    let download_dir = TempDir::new().unwrap();

    let history = Arc::new(HistoryStore::open_in_memory().await.unwrap());
    let cache = Arc::new(RequestCache::open_in_memory().await.unwrap());
    let governor = Arc::new(RateGovernor::new(GovernorConfig::default()));
    let cookies = CookieStore::new();
    let challenge = Arc::new(cratewalker_core::ChallengeSolver::new(None, "test-agent".to_string(), None));
    let http = HttpClient::new(Default::default(), cache, Arc::clone(&governor), cookies.clone(), challenge).unwrap();

    let engine = Arc::new(
        DownloadEngine::new(cookies, Arc::clone(&governor), Arc::clone(&history), EngineConfig::default()).unwrap(),
    );

    let (tx, mut rx) = unbounded_channel();
    let dispatcher = Dispatcher::new(
        http,
        Arc::new(ScraperRegistry::new()),
        Arc::clone(&history),
        tx,
        None,
        FilterConfig::default(),
        4,
        download_dir.path().to_path_buf(),
        None,
    );

    let url = format!("{}/files/photo.jpg", server.uri());
    let items = dispatcher.prepare_items(
        &[cratewalker_core::InputUrl {
            url: url.clone(),
            group_title: None,
        }],
        &DispatchStats::default(),
    );
    assert_eq!(items.len(), 1);

    let stats = dispatcher.run(items).await;
    assert_eq!(stats.scraped_ok(), 1);

    let download_item = rx.try_recv().expect("dispatcher emitted a download item");
    assert_eq!(download_item.source_url, url);

    let outcome = engine.download(download_item).await.unwrap();
    assert_eq!(outcome, cratewalker_core::DownloadOutcome::Completed { filesize: content.len() as u64 });
    assert!(history.is_complete("no_crawler", &url).await.unwrap());
}
