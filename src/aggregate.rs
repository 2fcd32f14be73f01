//! Token-level sentiment aggregation.
//!
//! Groups scraped posts by resolved symbol and derives the per-token
//! scores. Posts without a symbol never reach a group. The whole
//! sentiment document is recomputed from scratch on every run.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::decision::{clamp01, Verdict};
use crate::scrape::types::Post;
use crate::sentiment::SentimentScorer;
use crate::store::Stores;

/// Blend weights and engagement constants. Defaults are the tuned values;
/// kept in one struct so the blend can move without touching the math.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub raw_w: f64,
    pub agg_w: f64,
    pub eng_w: f64,
    /// Weight of comment counts relative to upvotes.
    pub comment_weight: f64,
    /// Per-post engagement bonus.
    pub alpha: f64,
    /// Engagement normalization reference.
    pub engagement_ref: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            raw_w: 0.3,
            agg_w: 0.5,
            eng_w: 0.2,
            comment_weight: 0.5,
            alpha: 5.0,
            engagement_ref: 500.0,
        }
    }
}

/// Per-symbol aggregation result. Sentiment fields are unit-interval,
/// rounded to 4 decimals for stable document diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub symbol: String,
    pub posts: Vec<Post>,
    pub raw_sentiment: f64,
    pub aggregate_sentiment: f64,
    pub engagement: f64,
    pub confidence: u8,
    pub recommendation: Verdict,
}

pub struct SentimentAggregator {
    scorer: Arc<dyn SentimentScorer>,
    weights: ScoreWeights,
}

impl SentimentAggregator {
    pub fn new(scorer: Arc<dyn SentimentScorer>) -> Self {
        Self {
            scorer,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(scorer: Arc<dyn SentimentScorer>, weights: ScoreWeights) -> Self {
        Self { scorer, weights }
    }

    /// Read the scrape document, recompute every token record, replace the
    /// sentiment document. Returns the number of records written.
    pub async fn run(&self, stores: &Stores) -> Result<usize> {
        let posts: Vec<Post> = stores
            .posts
            .read_array()
            .await
            .context("reading scraped posts")?;
        let records = self.aggregate(&posts);
        stores
            .sentiment
            .replace(&records)
            .await
            .context("writing sentiment document")?;
        metrics::counter!("aggregate_runs_total").increment(1);
        tracing::info!(
            posts = posts.len(),
            tokens = records.len(),
            "sentiment aggregation finished"
        );
        Ok(records.len())
    }

    /// Group posts by symbol and score each group. Output is ordered by
    /// symbol so identical inputs produce identical documents.
    pub fn aggregate(&self, posts: &[Post]) -> Vec<TokenRecord> {
        let mut groups: BTreeMap<String, Vec<Post>> = BTreeMap::new();
        for post in posts {
            if let Some(symbol) = &post.token_symbol {
                groups.entry(symbol.clone()).or_default().push(post.clone());
            }
        }

        groups
            .into_iter()
            .map(|(symbol, group)| self.score_group(symbol, group))
            .collect()
    }

    fn score_group(&self, symbol: String, posts: Vec<Post>) -> TokenRecord {
        let w = &self.weights;
        let n = posts.len() as f64;

        // Raw: plain mean over title+content polarity.
        let raw_mean = posts
            .iter()
            .map(|p| self.scorer.score(&format!("{} {}", p.title, p.content)))
            .sum::<f64>()
            / n;

        // Aggregate: engagement-weighted mean over the full post text.
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut plain_sum = 0.0;
        for p in &posts {
            let mut text = format!("{} {}", p.title, p.content);
            if !p.comments.is_empty() {
                text.push(' ');
                text.push_str(&p.comments.join(" "));
            }
            let s = self.scorer.score(&text);
            let weight = (1.0 + p.upvotes as f64).ln()
                + w.comment_weight * (1.0 + p.comment_count as f64).ln();
            weighted_sum += weight * s;
            weight_sum += weight;
            plain_sum += s;
        }
        // Zero total weight (no engagement anywhere): plain mean.
        let agg_mean = if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            plain_sum / n
        };

        let upvotes: u64 = posts.iter().map(|p| p.upvotes).sum();
        let comment_count: u64 = posts.iter().map(|p| p.comment_count).sum();
        let engagement = (upvotes as f64 + w.comment_weight * comment_count as f64 + w.alpha * n)
            / w.engagement_ref;

        let raw_sentiment = round4(normalize_to_unit(raw_mean));
        let aggregate_sentiment = round4(normalize_to_unit(agg_mean));
        let engagement = round4(engagement.min(1.0));

        let confidence = (100.0
            * clamp01(
                w.raw_w * raw_sentiment + w.agg_w * aggregate_sentiment + w.eng_w * engagement,
            ))
        .round() as u8;

        TokenRecord {
            symbol,
            posts,
            raw_sentiment,
            aggregate_sentiment,
            engagement,
            confidence,
            recommendation: Verdict::from_confidence(confidence),
        }
    }
}

/// [-1, 1] -> [0, 1]
fn normalize_to_unit(x: f64) -> f64 {
    (x + 1.0) / 2.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
