//! Token identification.
//!
//! A cheap `$TICKER` title match answers most posts. Everything else goes
//! through a network oracle that rate-limits aggressively, so oracle calls
//! are funneled through a capacity-1 semaphore in FIFO order. Results are
//! memoized per post id, and a resolved symbol is written back into the
//! scrape store in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::retry::{retry, BackoffPolicy};
use crate::scrape::types::Post;
use crate::store::Stores;

/// All-caps English words that look like tickers but never are.
const TICKER_STOPWORDS: &[&str] = &["THE", "THIS", "THAT", "WITH", "FROM", "HAVE", "HERE", "THERE"];

/// How many comments feed the oracle prompt.
const PROMPT_COMMENTS: usize = 5;

#[async_trait]
pub trait TokenOracle: Send + Sync {
    /// Identify the token symbol discussed in `text`, if any.
    async fn identify(&self, text: &str) -> Result<Option<String>>;
    fn name(&self) -> &'static str;
}

pub struct TokenResolver {
    oracle: Option<Arc<dyn TokenOracle>>,
    gate: Semaphore,
    memo: Mutex<HashMap<u64, Option<String>>>,
    policy: BackoffPolicy,
}

impl TokenResolver {
    pub fn new(oracle: Option<Arc<dyn TokenOracle>>) -> Self {
        Self {
            oracle,
            gate: Semaphore::new(1),
            memo: Mutex::new(HashMap::new()),
            policy: BackoffPolicy::default(),
        }
    }

    /// Fast path: a `$TICKER` in the title, 2-5 uppercase letters, exactly
    /// one distinct symbol in the whole title.
    pub fn extract_from_title(title: &str) -> Option<String> {
        static RE: OnceCell<regex::Regex> = OnceCell::new();
        let re = RE.get_or_init(|| regex::Regex::new(r"\$([A-Z]{2,5})\b").unwrap());
        let distinct: HashSet<&str> = re
            .captures_iter(title)
            .map(|c| c.get(1).unwrap().as_str())
            .filter(|t| !TICKER_STOPWORDS.contains(t))
            .collect();
        if distinct.len() == 1 {
            distinct.into_iter().next().map(str::to_uppercase)
        } else {
            None
        }
    }

    /// Resolve the symbol for a post. Fast path first, then the oracle
    /// behind the global gate. `None` means the post stays symbol-less.
    pub async fn resolve(&self, post: &Post, cancel: &CancellationToken) -> Option<String> {
        if let Some(hit) = self.memo.lock().await.get(&post.id) {
            return hit.clone();
        }

        if let Some(symbol) = Self::extract_from_title(&post.title) {
            metrics::counter!("resolver_fast_path_total").increment(1);
            self.memo.lock().await.insert(post.id, Some(symbol.clone()));
            return Some(symbol);
        }

        let resolved = match self.oracle.as_deref() {
            Some(_) => self.ask_oracle(post, cancel).await,
            None => None,
        };
        if resolved.is_none() {
            metrics::counter!("resolver_miss_total").increment(1);
        }
        self.memo.lock().await.insert(post.id, resolved.clone());
        resolved
    }

    async fn ask_oracle(&self, post: &Post, cancel: &CancellationToken) -> Option<String> {
        let oracle = self.oracle.as_ref()?;
        let mut prompt = format!("{} {}", post.title, post.content);
        if !post.comments.is_empty() {
            prompt.push(' ');
            prompt.push_str(
                &post
                    .comments
                    .iter()
                    .take(PROMPT_COMMENTS)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }

        // Capacity 1: the oracle rate-limits aggressively, callers queue FIFO.
        let _permit = self.gate.acquire().await.ok()?;
        if cancel.is_cancelled() {
            return None;
        }
        metrics::counter!("resolver_oracle_calls_total").increment(1);

        match retry(self.policy, cancel, "token oracle", || {
            oracle.identify(&prompt)
        })
        .await
        {
            Ok(Some(symbol)) if !symbol.eq_ignore_ascii_case("unknown") => {
                Some(symbol.to_uppercase())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, post_id = post.id, "token oracle failed");
                None
            }
        }
    }

    /// Resolve in the background and write the symbol back into the scrape
    /// store in place.
    pub fn spawn_resolve(self: &Arc<Self>, stores: Arc<Stores>, post: Post, cancel: CancellationToken) {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let Some(symbol) = resolver.resolve(&post, &cancel).await else {
                return;
            };
            let updated = stores
                .posts
                .update_post(post.id, |p| p.token_symbol = Some(symbol.clone()))
                .await;
            match updated {
                Ok(true) => {
                    tracing::debug!(post_id = post.id, symbol = %symbol, "token resolved");
                }
                Ok(false) => {
                    tracing::warn!(post_id = post.id, "resolved token for a post no longer in store");
                }
                Err(e) => {
                    tracing::warn!(error = ?e, post_id = post.id, "failed to persist token symbol");
                }
            }
        });
    }
}

/// Completion-endpoint oracle. `ORACLE_API_KEY` missing disables the slow
/// path entirely; the fast path still runs.
pub struct HttpOracle {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpOracle {
    pub fn from_env(timeout: Duration) -> Option<Arc<dyn TokenOracle>> {
        let api_key = std::env::var("ORACLE_API_KEY").ok()?;
        let url = std::env::var("ORACLE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .ok()?;
        Some(Arc::new(Self { http, url, api_key }))
    }
}

#[async_trait]
impl TokenOracle for HttpOracle {
    async fn identify(&self, text: &str) -> Result<Option<String>> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "Identify the cryptocurrency ticker symbol this post discusses. \
                   Reply with the bare symbol in uppercase (2-5 letters), or UNKNOWN.";
        let req = Req {
            model: "gpt-4o-mini",
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
            max_tokens: 8,
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("calling token oracle")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("token oracle returned {status}");
        }
        let body: Resp = resp.json().await.context("parsing oracle response")?;
        let answer = body
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or_default();
        let cleaned: String = answer
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        if (2..=5).contains(&cleaned.len()) && cleaned != "UNKNOWN" {
            Ok(Some(cleaned))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &'static str {
        "completion-oracle"
    }
}
