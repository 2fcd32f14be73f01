use once_cell::sync::Lazy;
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

/// Valences in the lexicon live in [-3, 3].
const MAX_VALENCE: f64 = 3.0;

/// Text polarity in [-1, 1]. The scorer is a pure function of the text;
/// the aggregator takes it by trait so tests can pin exact values.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

/// Bundled lexicon scorer: average valence of matched tokens, normalized.
/// Texts with no lexicon hits score 0.
#[derive(Debug, Clone, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let mut sum = 0i64;
        let mut matched = 0u32;
        for token in tokenize(text) {
            if let Some(v) = LEXICON.get(&token) {
                sum += *v as i64;
                matched += 1;
            }
        }
        if matched == 0 {
            return 0.0;
        }
        (sum as f64 / (matched as f64 * MAX_VALENCE)).clamp(-1.0, 1.0)
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_and_negative_terms_move_the_score() {
        let s = LexiconScorer::new();
        assert!(s.score("this coin is mooning, bullish!") > 0.0);
        assert!(s.score("total rug pull, scam") < 0.0);
    }

    #[test]
    fn unknown_text_scores_zero() {
        let s = LexiconScorer::new();
        assert_eq!(s.score("zzz qqq xyzzy"), 0.0);
        assert_eq!(s.score(""), 0.0);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let s = LexiconScorer::new();
        for text in ["moon moon moon moon", "rug rug scam dump dump"] {
            let v = s.score(text);
            assert!((-1.0..=1.0).contains(&v), "{text} -> {v}");
        }
    }
}
