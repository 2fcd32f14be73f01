// tests/api_http.rs
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::util::ServiceExt;

use memecoin_radar::aggregate::SentimentAggregator;
use memecoin_radar::api::create_router;
use memecoin_radar::config::AppConfig;
use memecoin_radar::enrich::MarketEnricher;
use memecoin_radar::events::EventBus;
use memecoin_radar::scrape::fetcher::FetchResult;
use memecoin_radar::scrape::resolver::TokenResolver;
use memecoin_radar::scrape::types::{Post, ScrapeLimits, SourceSpec};
use memecoin_radar::scrape::{RawPost, ScrapeCoordinator, SourceWorker, WorkerFactory};
use memecoin_radar::sentiment::LexiconScorer;
use memecoin_radar::store::Stores;
use memecoin_radar::supervisor::PipelineSupervisor;

/// Worker whose single listing load takes a while, to hold the scraper in
/// the running state during assertions.
struct SlowWorker;

#[async_trait]
impl SourceWorker for SlowWorker {
    async fn open(&mut self) -> FetchResult<()> {
        Ok(())
    }

    async fn load_listing(&mut self) -> FetchResult<Vec<RawPost>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(vec![RawPost {
            source: "r/pumpfun".into(),
            platform: "reddit".into(),
            title: "$AAA slow and steady".into(),
            content: String::new(),
            author: String::new(),
            timestamp: Utc::now(),
            post_age: "1 hour ago".into(),
            upvotes: 1,
            comment_count: 0,
            link: "https://example.test/slow".into(),
        }])
    }

    async fn load_comments(&mut self, _link: &str, _cap: usize) -> FetchResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn scroll(&mut self) -> FetchResult<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct SlowFactory;

#[async_trait]
impl WorkerFactory for SlowFactory {
    async fn create(&self, _spec: &SourceSpec) -> FetchResult<Box<dyn SourceWorker>> {
        Ok(Box::new(SlowWorker))
    }
}

fn test_config(data_dir: &Path) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        sources: vec![SourceSpec::reddit("pumpfun")],
        limits: ScrapeLimits {
            max_concurrent_sources: 3,
            max_pages_per_source: 1,
            comments_per_post: 5,
            scrolls_per_page: 1,
        },
        max_post_age_days: 14,
        source_budget: Duration::from_secs(10),
        debounce: Duration::from_secs(3),
        watch_interval: Duration::from_millis(50),
        enrich_parallelism: 4,
        provider_cooldown: Duration::from_secs(30),
        call_timeout: Duration::from_secs(2),
    }
}

fn app(dir: &Path) -> (axum::Router, Arc<Stores>) {
    let stores = Arc::new(Stores::new(dir));
    let bus = EventBus::default();
    let coordinator = Arc::new(ScrapeCoordinator::new(
        Arc::clone(&stores),
        Arc::new(TokenResolver::new(None)),
        Arc::new(SlowFactory),
        bus.clone(),
    ));
    let aggregator = Arc::new(SentimentAggregator::new(Arc::new(LexiconScorer::new())));
    let enricher = Arc::new(MarketEnricher::new(
        vec![],
        4,
        Duration::from_secs(2),
        Duration::from_secs(30),
    ));
    let supervisor = PipelineSupervisor::new(
        test_config(dir),
        Arc::clone(&stores),
        coordinator,
        aggregator,
        enricher,
        bus.clone(),
    );
    (create_router(supervisor, Arc::clone(&stores), bus), stores)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_identifies_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _stores) = app(dir.path());

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("memecoin-radar"));
}

#[tokio::test]
async fn status_and_data_read_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (app, stores) = app(dir.path());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/scraper/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["running"], false);
    assert!(v.get("pid").is_none());

    // data endpoint is 200 even with nothing scraped yet
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/scraper/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["count"], 0);

    stores
        .posts
        .merge_posts(&[Post {
            id: 1,
            source: "r/pumpfun".into(),
            platform: "reddit".into(),
            title: "hello".into(),
            content: String::new(),
            author: String::new(),
            timestamp: Utc::now(),
            post_age: String::new(),
            upvotes: 0,
            comment_count: 0,
            comments: Vec::new(),
            link: "https://example.test/1".into(),
            token_symbol: None,
        }])
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::get("/api/scraper/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let v = body_json(response).await;
    assert_eq!(v["count"], 1);
    assert_eq!(v["data"][0]["source"], "r/pumpfun");
}

#[tokio::test]
async fn stop_while_idle_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _stores) = app(dir.path());

    let response = app
        .oneshot(
            Request::post("/api/scraper/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let v = body_json(response).await;
    assert_eq!(v["success"], false);
}

#[tokio::test]
async fn start_stop_lifecycle_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _stores) = app(dir.path());

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/scraper/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["success"], true);
    assert!(v["pid"].is_number());

    // the slow worker is still loading its listing
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/scraper/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/scraper/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let v = body_json(response).await;
    assert_eq!(v["running"], true);
    assert!(v["pid"].is_number());

    let response = app
        .oneshot(
            Request::post("/api/scraper/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["success"], true);
}
