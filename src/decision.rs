//! Recommendation verdicts.

use serde::{Deserialize, Serialize};

/// Trade stance derived from a token's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Buy,
    Hold,
    Sell,
}

pub const BUY_THRESHOLD: u8 = 75;
pub const HOLD_THRESHOLD: u8 = 55;

impl Verdict {
    /// BUY at confidence >= 75, HOLD at 55..75, SELL below.
    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= BUY_THRESHOLD {
            Verdict::Buy
        } else if confidence >= HOLD_THRESHOLD {
            Verdict::Hold
        } else {
            Verdict::Sell
        }
    }
}

pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_boundaries() {
        assert_eq!(Verdict::from_confidence(100), Verdict::Buy);
        assert_eq!(Verdict::from_confidence(75), Verdict::Buy);
        assert_eq!(Verdict::from_confidence(74), Verdict::Hold);
        assert_eq!(Verdict::from_confidence(55), Verdict::Hold);
        assert_eq!(Verdict::from_confidence(54), Verdict::Sell);
        assert_eq!(Verdict::from_confidence(0), Verdict::Sell);
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&Verdict::Hold).unwrap(), "\"HOLD\"");
        assert_eq!(serde_json::to_string(&Verdict::Sell).unwrap(), "\"SELL\"");
    }
}
