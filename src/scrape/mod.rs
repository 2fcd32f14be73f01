// src/scrape/mod.rs
pub mod fetcher;
pub mod reddit;
pub mod resolver;
pub mod types;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus};
use crate::retry::{retry, BackoffPolicy};
use crate::scrape::fetcher::{FetchError, FetchResult, FetcherFactory};
use crate::scrape::reddit::RedditWorker;
use crate::scrape::resolver::TokenResolver;
use crate::scrape::types::{within_max_age, Post, ScrapeLimits, ScrapeStats, SourceSpec};
use crate::store::Stores;

/// Consecutive seen/stale candidates before a source is considered drained.
const SKIP_THRESHOLD: u32 = 10;

/// Pause between scrolls so the listing can load.
const SCROLL_SETTLE: Duration = Duration::from_millis(700);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scrape_posts_total", "Posts appended to the scrape store.");
        describe_counter!(
            "scrape_skipped_total",
            "Listing candidates skipped as seen or stale."
        );
        describe_counter!("scrape_source_errors_total", "Source tasks that failed.");
        describe_counter!(
            "scrape_append_dropped_total",
            "Posts dropped after append retries."
        );
        describe_counter!("resolver_fast_path_total", "Symbols resolved from the title.");
        describe_counter!("resolver_oracle_calls_total", "Oracle round-trips.");
        describe_counter!("resolver_miss_total", "Posts left without a symbol.");
        describe_gauge!("scrape_last_run_ts", "Unix ts of the last coordinator run.");
    });
}

/// A listing candidate before it gets an id.
#[derive(Debug, Clone)]
pub struct RawPost {
    pub source: String,
    pub platform: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub post_age: String,
    pub upvotes: u64,
    pub comment_count: u64,
    pub link: String,
}

/// Per-source scraping driver. One instance per source task, owning its
/// own page.
#[async_trait]
pub trait SourceWorker: Send {
    async fn open(&mut self) -> FetchResult<()>;
    /// Current listing page, newest first.
    async fn load_listing(&mut self) -> FetchResult<Vec<RawPost>>;
    async fn load_comments(&mut self, link: &str, cap: usize) -> FetchResult<Vec<String>>;
    async fn scroll(&mut self) -> FetchResult<()>;
    async fn close(&mut self);
}

#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn create(&self, spec: &SourceSpec) -> FetchResult<Box<dyn SourceWorker>>;
}

/// Default factory: a reddit worker over a fresh remote page per source.
pub struct RedditWorkerFactory {
    fetchers: Arc<dyn FetcherFactory>,
}

impl RedditWorkerFactory {
    pub fn new(fetchers: Arc<dyn FetcherFactory>) -> Self {
        Self { fetchers }
    }
}

#[async_trait]
impl WorkerFactory for RedditWorkerFactory {
    async fn create(&self, spec: &SourceSpec) -> FetchResult<Box<dyn SourceWorker>> {
        let fetcher = self.fetchers.create().await?;
        Ok(Box::new(RedditWorker::new(fetcher, spec.clone())))
    }
}

/// Fans source workers out under bounded parallelism, deduplicates against
/// the scrape store, and appends posts with process-wide monotonic ids.
pub struct ScrapeCoordinator {
    stores: Arc<Stores>,
    resolver: Arc<TokenResolver>,
    workers: Arc<dyn WorkerFactory>,
    bus: EventBus,
    next_id: AtomicU64,
    seen: Mutex<HashSet<(String, String)>>,
    /// Id assignment and store append form one critical section so ids
    /// are strictly increasing in append order.
    append_gate: Mutex<()>,
    policy: BackoffPolicy,
}

impl ScrapeCoordinator {
    pub fn new(
        stores: Arc<Stores>,
        resolver: Arc<TokenResolver>,
        workers: Arc<dyn WorkerFactory>,
        bus: EventBus,
    ) -> Self {
        Self {
            stores,
            resolver,
            workers,
            bus,
            next_id: AtomicU64::new(1),
            seen: Mutex::new(HashSet::new()),
            append_gate: Mutex::new(()),
            policy: BackoffPolicy::default(),
        }
    }

    /// Run one scrape pass over `sources`. Returns aggregate counters; a
    /// failed source never aborts its siblings.
    pub async fn run(
        self: &Arc<Self>,
        sources: &[SourceSpec],
        cutoff_age_days: u64,
        wall_budget: Duration,
        limits: ScrapeLimits,
        cancel: &CancellationToken,
    ) -> ScrapeStats {
        ensure_metrics_described();
        self.seed_from_store().await;

        let gate = Arc::new(Semaphore::new(limits.max_concurrent_sources.max(1)));
        let mut handles = Vec::with_capacity(sources.len());

        for spec in sources.iter().cloned() {
            let coordinator = Arc::clone(self);
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = gate.acquire().await else {
                    return SourceOutcome::failed();
                };
                if cancel.is_cancelled() {
                    return SourceOutcome::failed();
                }
                coordinator
                    .scrape_source(spec, cutoff_age_days, wall_budget, limits, cancel)
                    .await
            }));
        }

        let mut stats = ScrapeStats::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    stats.posts_scraped += outcome.scraped;
                    stats.posts_skipped += outcome.skipped;
                    if outcome.ok {
                        stats.sources_completed += 1;
                    } else {
                        stats.sources_failed += 1;
                        counter!("scrape_source_errors_total").increment(1);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "source task panicked");
                    stats.sources_failed += 1;
                    counter!("scrape_source_errors_total").increment(1);
                }
            }
        }

        gauge!("scrape_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            scraped = stats.posts_scraped,
            skipped = stats.posts_skipped,
            completed = stats.sources_completed,
            failed = stats.sources_failed,
            "scrape pass finished"
        );
        stats
    }

    /// Seed the seen-set and the id counter from whatever is persisted at
    /// run start. The set mirrors the store: a truncated store means a
    /// fresh set, an extended one means re-runs extend rather than
    /// duplicate.
    async fn seed_from_store(&self) {
        let existing: Vec<Post> = self.stores.posts.read_array().await.unwrap_or_default();
        let mut seen = self.seen.lock().await;
        seen.clear();
        let mut max_id = 0u64;
        for p in &existing {
            seen.insert(p.key());
            max_id = max_id.max(p.id);
        }
        // Only move forward; the counter survives across runs in-process.
        let floor = max_id + 1;
        if self.next_id.load(Ordering::SeqCst) < floor {
            self.next_id.store(floor, Ordering::SeqCst);
        }
    }

    async fn scrape_source(
        self: &Arc<Self>,
        spec: SourceSpec,
        cutoff_age_days: u64,
        wall_budget: Duration,
        limits: ScrapeLimits,
        cancel: CancellationToken,
    ) -> SourceOutcome {
        let tag = spec.tag();
        let deadline = Instant::now() + wall_budget;
        let mut outcome = SourceOutcome {
            scraped: 0,
            skipped: 0,
            ok: true,
        };

        let created = retry(self.policy, &cancel, "start worker", || {
            self.workers.create(&spec)
        })
        .await;
        let mut worker = match created {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(source = %tag, error = %e, "could not start worker");
                return SourceOutcome::failed();
            }
        };

        self.bus.publish(Event::ThreadUpdate {
            source_tag: tag.clone(),
            line: "scrape started".to_string(),
        });

        let result = self
            .drive_worker(
                worker.as_mut(),
                &spec,
                cutoff_age_days,
                deadline,
                limits,
                &cancel,
                &mut outcome,
            )
            .await;
        worker.close().await;

        match result {
            Ok(()) => {
                self.bus.publish(Event::ThreadUpdate {
                    source_tag: tag,
                    line: format!("scrape finished: {} posts", outcome.scraped),
                });
            }
            Err(e) => {
                tracing::warn!(source = %tag, error = %e, "source failed");
                self.bus.publish(Event::ThreadUpdate {
                    source_tag: tag,
                    line: format!("scrape failed: {e}"),
                });
                outcome.ok = false;
            }
        }
        outcome
    }

    /// Sleep out the backoff before retry number `attempt`. Returns false
    /// when the attempt budget is spent or cancellation fired, in which
    /// case the caller surfaces the error.
    async fn backoff_or_give_up(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
        what: &str,
        err: &FetchError,
    ) -> bool {
        if attempt >= self.policy.max_attempts || cancel.is_cancelled() {
            return false;
        }
        let delay = self.policy.delay(attempt - 1);
        tracing::warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "{what} failed, retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    async fn open_with_retry(
        &self,
        worker: &mut dyn SourceWorker,
        cancel: &CancellationToken,
    ) -> FetchResult<()> {
        let mut attempt = 0u32;
        loop {
            match worker.open().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if !self.backoff_or_give_up(attempt, cancel, "open listing", &e).await {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn listing_with_retry(
        &self,
        worker: &mut dyn SourceWorker,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<RawPost>> {
        let mut attempt = 0u32;
        loop {
            match worker.load_listing().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if !self.backoff_or_give_up(attempt, cancel, "load listing", &e).await {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn comments_with_retry(
        &self,
        worker: &mut dyn SourceWorker,
        link: &str,
        cap: usize,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<String>> {
        let mut attempt = 0u32;
        loop {
            match worker.load_comments(link, cap).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if !self.backoff_or_give_up(attempt, cancel, "load comments", &e).await {
                        return Err(e);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_worker(
        self: &Arc<Self>,
        worker: &mut dyn SourceWorker,
        spec: &SourceSpec,
        cutoff_age_days: u64,
        deadline: Instant,
        limits: ScrapeLimits,
        cancel: &CancellationToken,
        outcome: &mut SourceOutcome,
    ) -> Result<(), FetchError> {
        self.open_with_retry(worker, cancel).await?;

        let mut pages = 0u32;
        let mut consecutive_skips = 0u32;

        'pages: while pages < limits.max_pages_per_source {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }

            let listing = self.listing_with_retry(worker, cancel).await?;
            let mut all_stale = !listing.is_empty();

            for raw in listing {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    break 'pages;
                }

                if !within_max_age(&raw.post_age, cutoff_age_days) {
                    outcome.skipped += 1;
                    consecutive_skips += 1;
                    counter!("scrape_skipped_total").increment(1);
                    if consecutive_skips >= SKIP_THRESHOLD {
                        break 'pages;
                    }
                    continue;
                }
                all_stale = false;

                // Check-and-insert is one operation under the set lock.
                let key = (raw.source.clone(), raw.link.clone());
                if !self.seen.lock().await.insert(key) {
                    outcome.skipped += 1;
                    consecutive_skips += 1;
                    counter!("scrape_skipped_total").increment(1);
                    if consecutive_skips >= SKIP_THRESHOLD {
                        break 'pages;
                    }
                    continue;
                }
                consecutive_skips = 0;

                let mut comments = Vec::new();
                if raw.comment_count > 0 {
                    comments = self
                        .comments_with_retry(worker, &raw.link, limits.comments_per_post, cancel)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(source = %spec.tag(), error = %e, "comment scrape failed");
                            Vec::new()
                        });
                }

                if let Some(post) = self.append_post(raw, comments, cancel).await {
                    self.bus.publish(Event::ThreadUpdate {
                        source_tag: spec.tag(),
                        line: format!("post {}: {}", post.id, post.title),
                    });
                    self.resolver
                        .spawn_resolve(Arc::clone(&self.stores), post, cancel.clone());
                    outcome.scraped += 1;
                }
            }

            // A listing where every candidate failed the age check means
            // everything further down is older still.
            if all_stale {
                break;
            }

            pages += 1;
            if pages >= limits.max_pages_per_source {
                break;
            }
            for _ in 0..limits.scrolls_per_page {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    break 'pages;
                }
                if worker.scroll().await.is_err() {
                    break 'pages;
                }
                tokio::time::sleep(SCROLL_SETTLE).await;
            }
        }
        Ok(())
    }

    /// Assign the next id and append under one gate; comments are already
    /// attached, the symbol comes later via read-modify-write.
    async fn append_post(
        &self,
        raw: RawPost,
        comments: Vec<String>,
        cancel: &CancellationToken,
    ) -> Option<Post> {
        let _gate = self.append_gate.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let comment_count = if comments.is_empty() {
            raw.comment_count
        } else {
            comments.len() as u64
        };
        let post = Post {
            id,
            source: raw.source,
            platform: raw.platform,
            title: raw.title,
            content: raw.content,
            author: raw.author,
            timestamp: raw.timestamp,
            post_age: raw.post_age,
            upvotes: raw.upvotes,
            comment_count,
            comments,
            link: raw.link,
            token_symbol: None,
        };

        let appended = retry(self.policy, cancel, "post append", || {
            self.stores.posts.merge_posts(std::slice::from_ref(&post))
        })
        .await;
        match appended {
            Ok(()) => {
                counter!("scrape_posts_total").increment(1);
                Some(post)
            }
            Err(e) => {
                tracing::error!(error = ?e, post_id = post.id, "dropping post, append failed");
                counter!("scrape_append_dropped_total").increment(1);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SourceOutcome {
    scraped: u64,
    skipped: u64,
    ok: bool,
}

impl SourceOutcome {
    fn failed() -> Self {
        Self {
            scraped: 0,
            skipped: 0,
            ok: false,
        }
    }
}
