// src/scrape/types.rs
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// One scraped social-media item. `(source, link)` is unique within the
/// scrape store; `comments` and `tokenSymbol` may be filled after creation,
/// nothing else is mutated once the post is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    /// e.g. "r/pumpfun"
    pub source: String,
    /// "reddit", "twitter", ...
    pub platform: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Human-readable age as shown on the listing ("2 hours ago").
    #[serde(default)]
    pub post_age: String,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub comments: Vec<String>,
    pub link: String,
    #[serde(default)]
    pub token_symbol: Option<String>,
}

impl Post {
    /// Store dedup key.
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.link.clone())
    }
}

/// A source descriptor the coordinator fans out over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Subreddit name without the `r/` prefix.
    pub name: String,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_platform() -> String {
    "reddit".to_string()
}

impl SourceSpec {
    pub fn reddit(name: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: default_platform(),
        }
    }

    /// Tag used in the `source` field of scraped posts and in thread logs.
    pub fn tag(&self) -> String {
        format!("r/{}", self.name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScrapeLimits {
    pub max_concurrent_sources: usize,
    pub max_pages_per_source: u32,
    pub comments_per_post: usize,
    pub scrolls_per_page: u32,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 3,
            max_pages_per_source: 5,
            comments_per_post: 50,
            scrolls_per_page: 3,
        }
    }
}

/// Counters reported by a coordinator run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScrapeStats {
    pub posts_scraped: u64,
    pub posts_skipped: u64,
    pub sources_completed: u32,
    pub sources_failed: u32,
}

/// Parse listing counts like "1.2k" or "3m" into an integer.
pub fn parse_count(text: &str) -> u64 {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"([\d.]+)\s*([km]?)").unwrap());
    let t = text.trim().to_ascii_lowercase();
    let Some(caps) = re.captures(&t) else {
        return 0;
    };
    let num: f64 = caps[1].parse().unwrap_or(0.0);
    match &caps[2] {
        "k" => (num * 1_000.0) as u64,
        "m" => (num * 1_000_000.0) as u64,
        _ => num as u64,
    }
}

/// Decide whether a human-readable age string falls within `max_days`.
/// Unknown or sub-day formats ("3 hours ago", "just now") are kept.
pub fn within_max_age(post_age: &str, max_days: u64) -> bool {
    static RE_YM: OnceCell<regex::Regex> = OnceCell::new();
    static RE_WEEK: OnceCell<regex::Regex> = OnceCell::new();
    static RE_DAY: OnceCell<regex::Regex> = OnceCell::new();

    let s = post_age.trim().to_ascii_lowercase();
    if s.is_empty() {
        return true;
    }

    let re_ym = RE_YM
        .get_or_init(|| regex::Regex::new(r"(\d+)\s*(month|months|mo\.?|year|years|yr\.?)\s*ago").unwrap());
    if let Some(caps) = re_ym.captures(&s) {
        let n: u64 = caps[1].parse().unwrap_or(1);
        let days = if caps[2].starts_with('y') { n * 365 } else { n * 30 };
        return days <= max_days;
    }

    let re_week =
        RE_WEEK.get_or_init(|| regex::Regex::new(r"(\d+)\s*(week|weeks|wk\.?|w)\s*ago").unwrap());
    if let Some(caps) = re_week.captures(&s) {
        let n: u64 = caps[1].parse().unwrap_or(1);
        return n * 7 <= max_days;
    }

    let re_day =
        RE_DAY.get_or_init(|| regex::Regex::new(r"(\d+)\s*(day|days|d)\s*ago").unwrap());
    if let Some(caps) = re_day.captures(&s) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        return n <= max_days;
    }

    // hours / minutes / "just now"
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_parse_with_suffixes() {
        assert_eq!(parse_count("42"), 42);
        assert_eq!(parse_count("1.2k"), 1200);
        assert_eq!(parse_count("3m "), 3_000_000);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("n/a"), 0);
    }

    #[test]
    fn age_cutoff_uses_days() {
        assert!(within_max_age("5 hours ago", 14));
        assert!(within_max_age("just now", 14));
        assert!(within_max_age("13 days ago", 14));
        assert!(!within_max_age("15 days ago", 14));
        assert!(within_max_age("2 weeks ago", 14));
        assert!(!within_max_age("3 weeks ago", 14));
        assert!(!within_max_age("1 month ago", 14));
        assert!(!within_max_age("1 year ago", 14));
        assert!(within_max_age("", 14));
    }
}
