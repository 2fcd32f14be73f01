// tests/scrape_pipeline.rs
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use memecoin_radar::events::EventBus;
use memecoin_radar::scrape::fetcher::{FetchError, FetchResult};
use memecoin_radar::scrape::resolver::TokenResolver;
use memecoin_radar::scrape::types::{Post, ScrapeLimits, SourceSpec};
use memecoin_radar::scrape::{RawPost, ScrapeCoordinator, SourceWorker, WorkerFactory};
use memecoin_radar::store::Stores;

fn raw(source: &str, link: &str, title: &str, age: &str) -> RawPost {
    RawPost {
        source: source.to_string(),
        platform: "reddit".to_string(),
        title: title.to_string(),
        content: String::new(),
        author: "u/test".to_string(),
        timestamp: Utc::now(),
        post_age: age.to_string(),
        upvotes: 10,
        comment_count: 0,
        link: link.to_string(),
    }
}

/// Replays scripted listing pages; `scroll` advances to the next page.
struct ScriptedWorker {
    pages: VecDeque<Vec<RawPost>>,
    fail_listing: bool,
}

#[async_trait]
impl SourceWorker for ScriptedWorker {
    async fn open(&mut self) -> FetchResult<()> {
        Ok(())
    }

    async fn load_listing(&mut self) -> FetchResult<Vec<RawPost>> {
        if self.fail_listing {
            return Err(FetchError::Network("connection reset".into()));
        }
        Ok(self.pages.front().cloned().unwrap_or_default())
    }

    async fn load_comments(&mut self, _link: &str, _cap: usize) -> FetchResult<Vec<String>> {
        Ok(vec!["to the moon".to_string()])
    }

    async fn scroll(&mut self) -> FetchResult<()> {
        self.pages.pop_front();
        Ok(())
    }

    async fn close(&mut self) {}
}

struct ScriptedFactory {
    pages_by_source: HashMap<String, Vec<Vec<RawPost>>>,
    failing_sources: Vec<String>,
}

impl ScriptedFactory {
    fn single_page(source_pages: Vec<(&str, Vec<RawPost>)>) -> Self {
        Self {
            pages_by_source: source_pages
                .into_iter()
                .map(|(name, page)| (name.to_string(), vec![page]))
                .collect(),
            failing_sources: Vec::new(),
        }
    }
}

#[async_trait]
impl WorkerFactory for ScriptedFactory {
    async fn create(&self, spec: &SourceSpec) -> FetchResult<Box<dyn SourceWorker>> {
        Ok(Box::new(ScriptedWorker {
            pages: self
                .pages_by_source
                .get(&spec.name)
                .cloned()
                .unwrap_or_default()
                .into(),
            fail_listing: self.failing_sources.contains(&spec.name),
        }))
    }
}

fn coordinator(stores: Arc<Stores>, factory: ScriptedFactory) -> Arc<ScrapeCoordinator> {
    Arc::new(ScrapeCoordinator::new(
        stores,
        Arc::new(TokenResolver::new(None)),
        Arc::new(factory),
        EventBus::default(),
    ))
}

fn limits_one_page() -> ScrapeLimits {
    ScrapeLimits {
        max_concurrent_sources: 3,
        max_pages_per_source: 1,
        comments_per_post: 5,
        scrolls_per_page: 1,
    }
}

async fn wait_for_resolver_writes() {
    // spawned fast-path resolutions flush through the store quickly
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn dedup_holds_across_runs_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let sources = vec![SourceSpec::reddit("a"), SourceSpec::reddit("b")];
    let cancel = CancellationToken::new();

    let make_factory = || {
        ScriptedFactory::single_page(vec![
            ("a", vec![raw("r/a", "L", "first post on a", "1 hour ago")]),
            ("b", vec![raw("r/b", "L", "same link on b", "1 hour ago")]),
        ])
    };

    let coord = coordinator(Arc::clone(&stores), make_factory());
    let stats = coord
        .run(&sources, 14, Duration::from_secs(10), limits_one_page(), &cancel)
        .await;
    assert_eq!(stats.posts_scraped, 2);

    // Same link, different sources: both stored.
    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 2);

    // A second run over identical listings adds nothing.
    let coord2 = coordinator(Arc::clone(&stores), make_factory());
    let stats2 = coord2
        .run(&sources, 14, Duration::from_secs(10), limits_one_page(), &cancel)
        .await;
    assert_eq!(stats2.posts_scraped, 0);

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 2);

    let mut keys: Vec<(String, String)> = posts.iter().map(|p| p.key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 2, "no duplicate (source, link) pairs");
}

#[tokio::test]
async fn ids_are_strictly_increasing_in_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let cancel = CancellationToken::new();

    let pages: Vec<(&str, Vec<RawPost>)> = vec![
        (
            "a",
            (0..5)
                .map(|i| raw("r/a", &format!("a{i}"), "post on a", "1 hour ago"))
                .collect(),
        ),
        (
            "b",
            (0..5)
                .map(|i| raw("r/b", &format!("b{i}"), "post on b", "1 hour ago"))
                .collect(),
        ),
        (
            "c",
            (0..5)
                .map(|i| raw("r/c", &format!("c{i}"), "post on c", "1 hour ago"))
                .collect(),
        ),
    ];
    let coord = coordinator(Arc::clone(&stores), ScriptedFactory::single_page(pages));
    let sources = vec![
        SourceSpec::reddit("a"),
        SourceSpec::reddit("b"),
        SourceSpec::reddit("c"),
    ];
    coord
        .run(&sources, 14, Duration::from_secs(10), limits_one_page(), &cancel)
        .await;

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 15);
    // The store preserves append order; ids must rise strictly.
    for pair in posts.windows(2) {
        assert!(pair[1].id > pair[0].id, "ids not increasing: {:?}", pair);
    }
}

#[tokio::test]
async fn stale_posts_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let cancel = CancellationToken::new();

    let coord = coordinator(
        Arc::clone(&stores),
        ScriptedFactory::single_page(vec![(
            "a",
            vec![
                raw("r/a", "fresh", "fresh post", "2 days ago"),
                raw("r/a", "old", "ancient post", "2 months ago"),
            ],
        )]),
    );
    let stats = coord
        .run(
            &[SourceSpec::reddit("a")],
            14,
            Duration::from_secs(10),
            limits_one_page(),
            &cancel,
        )
        .await;
    assert_eq!(stats.posts_scraped, 1);
    assert_eq!(stats.posts_skipped, 1);

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].link, "fresh");
}

#[tokio::test]
async fn failing_source_does_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let cancel = CancellationToken::new();

    let mut factory = ScriptedFactory::single_page(vec![
        ("good", vec![raw("r/good", "g1", "healthy source", "1 hour ago")]),
        ("bad", vec![]),
    ]);
    factory.failing_sources.push("bad".to_string());

    let coord = coordinator(Arc::clone(&stores), factory);
    let stats = coord
        .run(
            &[SourceSpec::reddit("good"), SourceSpec::reddit("bad")],
            14,
            Duration::from_secs(30),
            limits_one_page(),
            &cancel,
        )
        .await;

    assert_eq!(stats.sources_completed, 1);
    assert_eq!(stats.sources_failed, 1);
    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 1);
}

#[tokio::test]
async fn fast_path_symbols_land_in_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let cancel = CancellationToken::new();

    let coord = coordinator(
        Arc::clone(&stores),
        ScriptedFactory::single_page(vec![(
            "a",
            vec![raw("r/a", "p1", "$PEP mooning hard", "1 hour ago")],
        )]),
    );
    coord
        .run(
            &[SourceSpec::reddit("a")],
            14,
            Duration::from_secs(10),
            limits_one_page(),
            &cancel,
        )
        .await;
    wait_for_resolver_writes().await;

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts[0].token_symbol.as_deref(), Some("PEP"));
}

#[tokio::test]
async fn comments_are_attached_before_the_post_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));
    let cancel = CancellationToken::new();

    let mut candidate = raw("r/a", "c1", "post with comments", "1 hour ago");
    candidate.comment_count = 3;
    let coord = coordinator(
        Arc::clone(&stores),
        ScriptedFactory::single_page(vec![("a", vec![candidate])]),
    );
    coord
        .run(
            &[SourceSpec::reddit("a")],
            14,
            Duration::from_secs(10),
            limits_one_page(),
            &cancel,
        )
        .await;

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts[0].comments, vec!["to the moon".to_string()]);
    assert_eq!(posts[0].comment_count, 1);
}
