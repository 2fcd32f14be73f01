//! Page fetcher abstraction.
//!
//! The browser transport is external to this service: workers only need
//! `navigate`, `evaluate` and `close`. The production implementation talks
//! to a remote-browser HTTP API (one session per worker); tests supply
//! scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("browser API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("script evaluation failed: {0}")]
    Script(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// A single browser page owned by one scrape worker.
#[async_trait]
pub trait PageFetcher: Send {
    async fn navigate(&mut self, url: &str) -> FetchResult<()>;
    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> FetchResult<Value>;
    /// Release the underlying session. Best-effort.
    async fn close(&mut self);
}

/// Hands out an isolated fetcher per source task.
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn create(&self) -> FetchResult<Box<dyn PageFetcher>>;
}

/// Remote-browser client: session per fetcher, JSON endpoints for
/// navigation and script evaluation.
pub struct RemoteBrowserFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    session_id: Option<String>,
}

impl RemoteBrowserFetcher {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            session_id: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut url = format!("{}/{path}", self.base_url);
        if let Some(ref token) = self.token {
            url.push_str(&format!("?token={token}"));
        }
        url
    }

    async fn ensure_session(&mut self) -> FetchResult<String> {
        if let Some(ref id) = self.session_id {
            return Ok(id.clone());
        }
        let resp = self.client.post(self.endpoint("session")).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let body: Value = resp.json().await?;
        let id = body
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Script("session response missing sessionId".into()))?
            .to_string();
        self.session_id = Some(id.clone());
        Ok(id)
    }

    async fn post_command(&mut self, path: &str, body: Value) -> FetchResult<Value> {
        let session_id = self.ensure_session().await?;
        let mut payload = body;
        payload["sessionId"] = Value::String(session_id);
        let resp = self
            .client
            .post(self.endpoint(path))
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl PageFetcher for RemoteBrowserFetcher {
    async fn navigate(&mut self, url: &str) -> FetchResult<()> {
        self.post_command("navigate", serde_json::json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> FetchResult<Value> {
        let body = self
            .post_command("evaluate", serde_json::json!({ "script": script }))
            .await?;
        // Some deployments wrap the value in a `result` envelope.
        Ok(match body {
            Value::Object(mut map) if map.contains_key("result") => {
                map.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    async fn close(&mut self) {
        if let Some(id) = self.session_id.take() {
            let url = self.endpoint(&format!("session/{id}"));
            if let Err(e) = self.client.delete(url).send().await {
                tracing::warn!(error = %e, "failed to close browser session");
            }
        }
    }
}

/// Factory producing one remote session per worker.
pub struct RemoteBrowserFactory {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl RemoteBrowserFactory {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: token.map(String::from),
            timeout,
        }
    }

    /// Reads `BROWSER_API_URL` / `BROWSER_API_TOKEN`, falling back to a
    /// local endpoint.
    pub fn from_env(timeout: Duration) -> Self {
        let base_url = std::env::var("BROWSER_API_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let token = std::env::var("BROWSER_API_TOKEN").ok();
        Self {
            base_url,
            token,
            timeout,
        }
    }
}

#[async_trait]
impl FetcherFactory for RemoteBrowserFactory {
    async fn create(&self) -> FetchResult<Box<dyn PageFetcher>> {
        Ok(Box::new(RemoteBrowserFetcher::new(
            &self.base_url,
            self.token.as_deref(),
            self.timeout,
        )?))
    }
}
