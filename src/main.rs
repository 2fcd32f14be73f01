//! # Memecoin Radar — Binary Entrypoint
//! Boots the Axum HTTP server, the store watcher, and the pipeline
//! supervisor.
//!
//! ## Endpoints
//! - `GET /` — service banner
//! - `GET /health` — liveness check
//! - `POST /api/scraper/start` — launch the scrape stage
//! - `POST /api/scraper/stop` — cancel the scrape stage
//! - `GET /api/scraper/status` — scraper state
//! - `GET /api/scraper/data` — current scraped posts
//! - `GET /ws` — duplex event channel (snapshot on connect)
//! - `GET /metrics` — Prometheus exposition

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use memecoin_radar::aggregate::SentimentAggregator;
use memecoin_radar::api;
use memecoin_radar::config::AppConfig;
use memecoin_radar::enrich::MarketEnricher;
use memecoin_radar::events::EventBus;
use memecoin_radar::metrics::Metrics;
use memecoin_radar::scrape::fetcher::{FetcherFactory, RemoteBrowserFactory};
use memecoin_radar::scrape::resolver::{HttpOracle, TokenResolver};
use memecoin_radar::scrape::{RedditWorkerFactory, ScrapeCoordinator};
use memecoin_radar::sentiment::LexiconScorer;
use memecoin_radar::store::Stores;
use memecoin_radar::supervisor::PipelineSupervisor;
use memecoin_radar::watcher::spawn_store_watcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let metrics = Metrics::init();
    let cfg = AppConfig::from_env().context("loading configuration")?;
    info!(sources = cfg.sources.len(), data_dir = %cfg.data_dir.display(), "starting");

    let stores = Arc::new(Stores::new(&cfg.data_dir));
    let bus = EventBus::default();

    let oracle = HttpOracle::from_env(cfg.call_timeout);
    if oracle.is_none() {
        info!("ORACLE_API_KEY not set, token resolution uses the title fast path only");
    }
    let resolver = Arc::new(TokenResolver::new(oracle));

    if std::env::var("BROWSER_API_URL").is_err() {
        info!("BROWSER_API_URL not set, assuming a local remote-browser endpoint");
    }
    let fetchers: Arc<dyn FetcherFactory> =
        Arc::new(RemoteBrowserFactory::from_env(cfg.call_timeout));
    let workers = Arc::new(RedditWorkerFactory::new(fetchers));
    let coordinator = Arc::new(ScrapeCoordinator::new(
        Arc::clone(&stores),
        resolver,
        workers,
        bus.clone(),
    ));

    let aggregator = Arc::new(SentimentAggregator::new(Arc::new(LexiconScorer::new())));
    let enricher = Arc::new(
        MarketEnricher::default_chain(
            cfg.enrich_parallelism,
            cfg.call_timeout,
            cfg.provider_cooldown,
        )
        .context("building enrichment chain")?,
    );

    let supervisor = PipelineSupervisor::new(
        cfg.clone(),
        Arc::clone(&stores),
        coordinator,
        aggregator,
        enricher,
        bus.clone(),
    );

    let shutdown = CancellationToken::new();
    let watcher = spawn_store_watcher(
        Arc::clone(&stores),
        Arc::clone(&supervisor),
        bus.clone(),
        cfg.watch_interval,
        shutdown.clone(),
    );

    let app = api::create_router(supervisor, stores, bus).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    watcher.abort();
    Ok(())
}
