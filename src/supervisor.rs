//! Pipeline supervision.
//!
//! Owns the three stages (scrape, aggregate, enrich) and guarantees that
//! at most one of them runs at any time. The scrape stage is started and
//! stopped over the control plane; the processing chain runs after every
//! scrape and, debounced, after observed scrape-store changes.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::aggregate::SentimentAggregator;
use crate::config::AppConfig;
use crate::enrich::MarketEnricher;
use crate::events::{Event, EventBus, Stage};
use crate::scrape::types::Post;
use crate::scrape::ScrapeCoordinator;
use crate::store::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Scraping,
    Processing,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("scraper already running")]
    AlreadyRunning,

    #[error("pipeline is processing")]
    Busy,

    #[error("scraper is not running")]
    NotRunning,

    #[error("failed to launch scraper: {0}")]
    Launch(String),
}

#[derive(Debug)]
struct Inner {
    state: PipelineState,
    /// A change arrived while processing; re-run once on completion.
    pending: bool,
    /// Debounce generation; a new change invalidates older timers.
    debounce_gen: u64,
    scrape_cancel: Option<CancellationToken>,
}

pub struct PipelineSupervisor {
    cfg: AppConfig,
    stores: Arc<Stores>,
    coordinator: Arc<ScrapeCoordinator>,
    aggregator: Arc<SentimentAggregator>,
    enricher: Arc<MarketEnricher>,
    bus: EventBus,
    inner: Mutex<Inner>,
}

impl PipelineSupervisor {
    pub fn new(
        cfg: AppConfig,
        stores: Arc<Stores>,
        coordinator: Arc<ScrapeCoordinator>,
        aggregator: Arc<SentimentAggregator>,
        enricher: Arc<MarketEnricher>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            stores,
            coordinator,
            aggregator,
            enricher,
            bus,
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                pending: false,
                debounce_gen: 0,
                scrape_cancel: None,
            }),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().expect("supervisor mutex poisoned").state
    }

    pub fn is_scraping(&self) -> bool {
        self.state() == PipelineState::Scraping
    }

    /// Launch the scrape stage. Rejected while any stage is running. The
    /// scrape store is reset to an empty document before the stage starts.
    pub async fn start_scrape(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let cancel = {
            let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
            match inner.state {
                PipelineState::Scraping => return Err(SupervisorError::AlreadyRunning),
                PipelineState::Processing => return Err(SupervisorError::Busy),
                PipelineState::Idle => {}
            }
            let cancel = CancellationToken::new();
            inner.state = PipelineState::Scraping;
            inner.scrape_cancel = Some(cancel.clone());
            cancel
        };

        if let Err(e) = self.stores.posts.replace::<Post>(&[]).await {
            let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
            inner.state = PipelineState::Idle;
            inner.scrape_cancel = None;
            return Err(SupervisorError::Launch(format!("{e:#}")));
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.run_scrape_stage(cancel).await });
        Ok(())
    }

    /// Cancel a running scrape. The stage drains and the processing chain
    /// runs over whatever posts were persisted. A stop while processing is
    /// rejected; the chain always runs to completion.
    pub fn stop_scrape(&self) -> Result<(), SupervisorError> {
        let inner = self.inner.lock().expect("supervisor mutex poisoned");
        match inner.state {
            PipelineState::Scraping => {
                if let Some(cancel) = &inner.scrape_cancel {
                    cancel.cancel();
                }
                Ok(())
            }
            _ => Err(SupervisorError::NotRunning),
        }
    }

    /// A scrape-store change was observed. While idle this arms (or
    /// re-arms) the debounce timer; while processing it flags one re-run.
    /// Changes during scraping are the scraper's own writes and are
    /// ignored, the post-scrape chain covers them.
    pub fn notify_file_changed(self: &Arc<Self>) {
        let armed_gen = {
            let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
            match inner.state {
                PipelineState::Scraping => return,
                PipelineState::Processing => {
                    inner.pending = true;
                    return;
                }
                PipelineState::Idle => {
                    inner.debounce_gen += 1;
                    inner.debounce_gen
                }
            }
        };
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.debounce_fire(armed_gen).await });
    }

    async fn debounce_fire(self: Arc<Self>, armed_gen: u64) {
        tokio::time::sleep(self.cfg.debounce).await;
        {
            let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
            // A newer change re-armed the window, or a stage got in first.
            if inner.debounce_gen != armed_gen || inner.state != PipelineState::Idle {
                return;
            }
            inner.state = PipelineState::Processing;
        }

        // An emptied or deleted scrape store keeps the last coin data.
        let posts: Vec<Post> = self.stores.posts.read_array().await.unwrap_or_default();
        if posts.is_empty() {
            self.bus
                .stage_log(Stage::Supervisor, "scrape store empty, keeping coin data");
            self.finish_processing(false);
            return;
        }

        self.run_processing().await;
    }

    async fn run_scrape_stage(self: Arc<Self>, cancel: CancellationToken) {
        self.bus.stage_log(Stage::Scraper, "scraper stage started");
        let stats = self
            .coordinator
            .run(
                &self.cfg.sources,
                self.cfg.max_post_age_days,
                self.cfg.source_budget,
                self.cfg.limits,
                &cancel,
            )
            .await;
        let stopped = cancel.is_cancelled();
        let failed = stats.sources_completed == 0 && stats.sources_failed > 0 && !stopped;
        let exit_code = i32::from(failed);

        self.bus.stage_log(
            Stage::Scraper,
            format!(
                "scraper stage finished: {} posts, {} sources ok, {} failed",
                stats.posts_scraped, stats.sources_completed, stats.sources_failed
            ),
        );
        self.bus.publish(Event::ScrapeStopped { exit_code });

        {
            let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
            inner.scrape_cancel = None;
            inner.state = PipelineState::Processing;
        }

        if failed {
            // Non-zero exit aborts the remaining chain.
            self.bus.publish(Event::Error {
                stage: Stage::Scraper,
                message: "all sources failed".to_string(),
            });
            self.finish_processing(false);
            return;
        }

        self.run_processing().await;
    }

    /// Aggregate then enrich, re-running once when a change arrived while
    /// the chain was in flight. State is already `Processing`.
    async fn run_processing(self: &Arc<Self>) {
        loop {
            match self.processing_chain().await {
                Ok(count) => {
                    self.bus.publish(Event::CoinsUpdated { count });
                }
                Err((stage, e)) => {
                    tracing::error!(stage = %stage, error = ?e, "stage failed");
                    self.bus.publish(Event::Error {
                        stage,
                        message: format!("{e:#}"),
                    });
                    self.finish_processing(false);
                    return;
                }
            }
            if !self.finish_processing(true) {
                return;
            }
        }
    }

    /// Leave `Processing`. Returns true when a pending re-run should keep
    /// the chain going (only honored on success).
    fn finish_processing(&self, honor_pending: bool) -> bool {
        let mut inner = self.inner.lock().expect("supervisor mutex poisoned");
        if honor_pending && inner.pending {
            inner.pending = false;
            return true;
        }
        inner.pending = false;
        inner.state = PipelineState::Idle;
        false
    }

    async fn processing_chain(&self) -> Result<usize, (Stage, anyhow::Error)> {
        self.bus
            .stage_log(Stage::Aggregator, "aggregator stage started");
        let tokens = self
            .aggregator
            .run(&self.stores)
            .await
            .map_err(|e| (Stage::Aggregator, e))?;
        self.bus.stage_log(
            Stage::Aggregator,
            format!("aggregator stage finished: {tokens} tokens"),
        );

        self.bus.stage_log(Stage::Enricher, "enricher stage started");
        let coins = self
            .enricher
            .run(&self.stores)
            .await
            .map_err(|e| (Stage::Enricher, e))?;
        self.bus.stage_log(
            Stage::Enricher,
            format!("enricher stage finished: {coins} coins"),
        );
        Ok(coins)
    }
}
