// tests/store_atomic.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use memecoin_radar::scrape::types::Post;
use memecoin_radar::store::{JsonStore, Stores};

fn post(id: u64, source: &str, link: &str) -> Post {
    Post {
        id,
        source: source.to_string(),
        platform: "reddit".into(),
        title: format!("post {id}"),
        content: String::new(),
        author: String::new(),
        timestamp: Utc::now(),
        post_age: String::new(),
        upvotes: 0,
        comment_count: 0,
        comments: Vec::new(),
        link: link.to_string(),
        token_symbol: None,
    }
}

/// A full document of `n` posts tagged with a generation marker so a
/// reader can tell whether it saw one consistent snapshot.
fn generation(generation: u64, n: u64) -> Vec<Post> {
    (0..n)
        .map(|i| post(generation, "r/gen", &format!("link-{generation}-{i}")))
        .collect()
}

#[tokio::test]
async fn readers_never_observe_partial_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::new(dir.path().join("posts.json")));
    store.replace(&generation(0, 50)).await.unwrap();

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for g in 1..=20u64 {
                store.replace(&generation(g, 50)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..100 {
                let posts: Vec<Post> = store.read_array().await.unwrap();
                assert_eq!(posts.len(), 50, "snapshot is complete");
                let g = posts[0].id;
                assert!(
                    posts.iter().all(|p| p.id == g),
                    "snapshot mixes generations"
                );
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}

#[tokio::test]
async fn empty_file_read_retries_until_a_writer_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.json");
    // zero-byte file, as seen between create and rename
    std::fs::write(&path, b"").unwrap();

    let store = Arc::new(JsonStore::new(path));
    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            store.replace(&generation(1, 3)).await.unwrap();
        })
    };

    let posts: Vec<Post> = store.read_array().await.unwrap();
    assert_eq!(posts.len(), 3);
    writer.await.unwrap();
}

#[tokio::test]
async fn empty_file_read_fails_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.json");
    std::fs::write(&path, b"").unwrap();

    let store = JsonStore::new(path);
    let result = store.read_array::<Post>().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn concurrent_appends_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(Stores::new(dir.path()));

    let mut handles = Vec::new();
    for task in 0..4u64 {
        let stores = Arc::clone(&stores);
        handles.push(tokio::spawn(async move {
            for i in 0..10u64 {
                let id = task * 10 + i;
                let p = post(id, &format!("r/{task}"), &format!("l{id}"));
                stores.posts.merge_posts(&[p]).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 40);
}

#[tokio::test]
async fn update_post_rewrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Stores::new(dir.path());
    stores
        .posts
        .merge_posts(&[post(1, "r/a", "l1"), post(2, "r/a", "l2")])
        .await
        .unwrap();

    let found = stores
        .posts
        .update_post(2, |p| p.token_symbol = Some("PEP".into()))
        .await
        .unwrap();
    assert!(found);

    let posts: Vec<Post> = stores.posts.read_array().await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].token_symbol.as_deref(), Some("PEP"));
    assert_eq!(posts[0].token_symbol, None);

    let missing = stores.posts.update_post(99, |_| {}).await.unwrap();
    assert!(!missing);
}
