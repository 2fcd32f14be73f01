// src/enrich/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::TokenRecord;
use crate::scrape::types::Post;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider asked us to back off; it goes on cool-down.
    #[error("rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Whatever subset of market data one provider could supply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMarketInfo {
    pub address: Option<String>,
    pub chain: Option<String>,
    pub price_usd: Option<f64>,
    pub change24h: Option<f64>,
    pub logo_url: Option<String>,
    pub decimals: Option<u32>,
}

impl PartialMarketInfo {
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.chain.is_none()
            && self.price_usd.is_none()
            && self.change24h.is_none()
            && self.logo_url.is_none()
            && self.decimals.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.address.is_some()
            && self.chain.is_some()
            && self.price_usd.is_some()
            && self.change24h.is_some()
            && self.logo_url.is_some()
            && self.decimals.is_some()
    }

    /// Fill only the fields still missing; earlier providers keep
    /// precedence.
    pub fn fill_missing_from(&mut self, other: PartialMarketInfo) {
        self.address = self.address.take().or(other.address);
        self.chain = self.chain.take().or(other.chain);
        self.price_usd = self.price_usd.take().or(other.price_usd);
        self.change24h = self.change24h.take().or(other.change24h);
        self.logo_url = self.logo_url.take().or(other.logo_url);
        self.decimals = self.decimals.take().or(other.decimals);
    }
}

/// One link in the ordered enrichment chain.
#[async_trait]
pub trait MarketProvider: Send + Sync {
    /// Look a symbol up. `known` carries fields already found by earlier
    /// providers (the metadata API needs the mint address, for instance).
    /// `Ok(None)` is a miss and does not short-circuit the chain.
    async fn lookup(
        &self,
        symbol: &str,
        known: &PartialMarketInfo,
    ) -> ProviderResult<Option<PartialMarketInfo>>;

    fn name(&self) -> &'static str;
}

/// A token record plus whatever market data the chain produced. One entry
/// per token record, even when every provider missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinEntry {
    #[serde(flatten)]
    pub token: TokenRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change24h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    /// The most recent post in the group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_post: Option<Post>,
}
