//! Subreddit worker: drives a `PageFetcher` over a listing page and the
//! post detail pages, extracting candidates via in-page script evaluation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::scrape::fetcher::{FetchError, FetchResult, PageFetcher};
use crate::scrape::types::{parse_count, SourceSpec};
use crate::scrape::{RawPost, SourceWorker};

const LISTING_LIMIT: usize = 25;

pub struct RedditWorker {
    fetcher: Box<dyn PageFetcher>,
    spec: SourceSpec,
}

impl RedditWorker {
    pub fn new(fetcher: Box<dyn PageFetcher>, spec: SourceSpec) -> Self {
        Self { fetcher, spec }
    }

    fn listing_url(&self) -> String {
        format!("https://www.reddit.com/r/{}/new/", self.spec.name)
    }

    fn listing_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const posts = [];
    const els = document.querySelectorAll('shreddit-post');
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const p = els[i];
        const title = p.getAttribute('post-title')
            || (p.querySelector('a[slot="title"]')?.textContent ?? '').trim();
        if (!title || title.length <= 3) continue;
        let body = '';
        const tb = p.querySelector('shreddit-post-text-body');
        if (tb) {{
            const d = tb.querySelector('.md, p');
            if (d) body = d.textContent.trim();
        }}
        const permalink = p.getAttribute('permalink') || '';
        posts.push({{
            title: title,
            content: body,
            score: p.getAttribute('score') || '0',
            comments: p.getAttribute('comment-count') || '0',
            timestamp: p.getAttribute('created-timestamp') || '',
            postAge: (p.querySelector('faceplate-timeago time')?.textContent ?? '').trim(),
            author: p.getAttribute('author') || '',
            url: permalink.startsWith('http') ? permalink : ('https://www.reddit.com' + permalink)
        }});
    }}
    return posts;
}})()"#
        )
    }

    fn comments_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const out = [];
    const els = document.querySelectorAll('shreddit-comment');
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const body = els[i].querySelector('shreddit-comment-body, [slot="comment-body"], .md, p');
        let text = (body ? body.textContent : els[i].textContent).trim()
            .replace(/\s+/g, ' ');
        if (text.length > 10) out.push(text);
    }}
    return out;
}})()"#
        )
    }
}

/// Parse one listing entry. Entries without a title or link are dropped.
fn parse_listing_entry(v: &Value, source_tag: &str, platform: &str) -> Option<RawPost> {
    let title = v.get("title")?.as_str()?.trim().to_string();
    let link = v.get("url")?.as_str()?.trim().to_string();
    if title.is_empty() || link.is_empty() {
        return None;
    }
    let str_of = |key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    let timestamp = v
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Some(RawPost {
        source: source_tag.to_string(),
        platform: platform.to_string(),
        title,
        content: str_of("content"),
        author: str_of("author"),
        timestamp,
        post_age: str_of("postAge"),
        upvotes: parse_count(&str_of("score")),
        comment_count: parse_count(&str_of("comments")),
        link,
    })
}

#[async_trait]
impl SourceWorker for RedditWorker {
    async fn open(&mut self) -> FetchResult<()> {
        self.fetcher.navigate(&self.listing_url()).await
    }

    async fn load_listing(&mut self) -> FetchResult<Vec<RawPost>> {
        let value = self
            .fetcher
            .evaluate(&Self::listing_script(LISTING_LIMIT))
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| FetchError::Script("listing script did not return an array".into()))?;
        let tag = self.spec.tag();
        Ok(entries
            .iter()
            .filter_map(|e| parse_listing_entry(e, &tag, &self.spec.platform))
            .collect())
    }

    async fn load_comments(&mut self, link: &str, cap: usize) -> FetchResult<Vec<String>> {
        self.fetcher.navigate(link).await?;
        let value = self.fetcher.evaluate(&Self::comments_script(cap)).await?;
        let comments = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        // Back to the listing; comment extraction navigated away from it.
        self.fetcher.navigate(&self.listing_url()).await?;
        Ok(comments)
    }

    async fn scroll(&mut self) -> FetchResult<()> {
        self.fetcher
            .evaluate("window.scrollTo(0, document.body.scrollHeight); true")
            .await
            .map(|_| ())
    }

    async fn close(&mut self) {
        self.fetcher.close().await;
    }
}
