//! JSON document stores.
//!
//! Three append/replace documents back the pipeline: scraped posts,
//! per-token sentiment, and enriched coin data. Writers hold the per-file
//! mutex, merge against current contents, and commit via a temp file
//! renamed over the target so readers never observe partial bytes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::scrape::types::Post;

const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF: Duration = Duration::from_millis(200);

pub const POSTS_FILE: &str = "scraped_posts.json";
pub const SENTIMENT_FILE: &str = "sentiment.json";
pub const COINS_FILE: &str = "coin-data.json";

/// One JSON-array document with exclusive-writer semantics.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document as a typed array. A missing file reads as empty;
    /// an empty or partial document (observed between create and rename of
    /// a concurrent writer) is retried before reporting failure.
    pub async fn read_array<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut last_err = None;
        for attempt in 0..READ_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(READ_BACKOFF).await;
            }
            match tokio::fs::read_to_string(&self.path).await {
                Ok(s) if s.trim().is_empty() => {
                    last_err = Some(anyhow::anyhow!("document is empty"));
                }
                Ok(s) => match serde_json::from_str::<Vec<T>>(&s) {
                    Ok(v) => return Ok(v),
                    Err(e) => last_err = Some(e.into()),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap()).with_context(|| format!("reading {}", self.path.display()))
    }

    /// Replace the whole document.
    pub async fn replace<T: Serialize>(&self, items: &[T]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.commit(items).await
    }

    /// Merge a batch of posts into the scrape document under the lock.
    pub async fn merge_posts(&self, incoming: &[Post]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let existing: Vec<Post> = match self.read_array().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, path = %self.path.display(), "unreadable document, merging into empty");
                Vec::new()
            }
        };
        let merged = merge_post_lists(existing, incoming);
        self.commit(&merged).await
    }

    /// Read-modify-write of a single post by id. Returns whether a post
    /// was found and updated.
    pub async fn update_post<F>(&self, id: u64, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Post),
    {
        let _guard = self.lock.lock().await;
        let mut posts: Vec<Post> = self.read_array().await.unwrap_or_default();
        let Some(post) = posts.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        mutate(post);
        self.commit(&posts).await?;
        Ok(true)
    }

    /// Write-temp-and-rename commit. The rename is what readers race
    /// against; they either see the old document or the new one.
    async fn commit<T: Serialize>(&self, items: &[T]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.ok();
        }
        let body = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("publishing {}", self.path.display()))?;
        Ok(())
    }
}

/// Dedupe by `(source, link)`. The existing record wins; a newer record
/// only upgrades `tokenSymbol` and `comments` when the existing ones are
/// empty.
pub fn merge_post_lists(existing: Vec<Post>, incoming: &[Post]) -> Vec<Post> {
    let mut out = existing;
    for new in incoming {
        match out
            .iter_mut()
            .find(|p| p.source == new.source && p.link == new.link)
        {
            Some(old) => {
                if old.token_symbol.is_none() && new.token_symbol.is_some() {
                    old.token_symbol = new.token_symbol.clone();
                }
                if old.comments.is_empty() && !new.comments.is_empty() {
                    old.comments = new.comments.clone();
                    old.comment_count = new.comment_count;
                }
            }
            None => out.push(new.clone()),
        }
    }
    out
}

/// The three pipeline documents rooted in one data directory.
#[derive(Debug)]
pub struct Stores {
    pub posts: JsonStore,
    pub sentiment: JsonStore,
    pub coins: JsonStore,
}

impl Stores {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            posts: JsonStore::new(dir.join(POSTS_FILE)),
            sentiment: JsonStore::new(dir.join(SENTIMENT_FILE)),
            coins: JsonStore::new(dir.join(COINS_FILE)),
        }
    }
}
