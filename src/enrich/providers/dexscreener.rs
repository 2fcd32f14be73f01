// src/enrich/providers/dexscreener.rs
use async_trait::async_trait;
use serde::Deserialize;

use crate::enrich::types::{MarketProvider, PartialMarketInfo, ProviderError, ProviderResult};

const SEARCH_URL: &str = "https://api.dexscreener.com/latest/dex/search";

/// DEX aggregator search. Keyless; first in the chain because it supplies
/// the address and the live price in one call.
pub struct DexScreenerProvider {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    #[serde(default)]
    chain_id: String,
    base_token: BaseToken,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    price_change: Option<PriceChange>,
    #[serde(default)]
    info: Option<PairInfo>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    #[serde(default)]
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairInfo {
    #[serde(default)]
    image_url: Option<String>,
}

impl DexScreenerProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn pick_pair(pairs: Vec<Pair>, symbol: &str) -> Option<Pair> {
        let mut solana: Vec<Pair> = pairs
            .into_iter()
            .filter(|p| p.chain_id.eq_ignore_ascii_case("solana"))
            .collect();
        if solana.is_empty() {
            return None;
        }
        let exact = solana.iter().position(|p| {
            p.base_token
                .symbol
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
        });
        Some(match exact {
            Some(i) => solana.swap_remove(i),
            None => solana.swap_remove(0),
        })
    }
}

#[async_trait]
impl MarketProvider for DexScreenerProvider {
    async fn lookup(
        &self,
        symbol: &str,
        _known: &PartialMarketInfo,
    ) -> ProviderResult<Option<PartialMarketInfo>> {
        let resp = self
            .http
            .get(SEARCH_URL)
            .query(&[("q", symbol)])
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let Some(pair) = body.pairs.and_then(|p| Self::pick_pair(p, symbol)) else {
            return Ok(None);
        };

        let info = PartialMarketInfo {
            address: pair.base_token.address,
            chain: Some("solana".to_string()),
            price_usd: pair.price_usd.as_deref().and_then(|s| s.parse().ok()),
            change24h: pair.price_change.and_then(|c| c.h24),
            logo_url: pair.info.and_then(|i| i.image_url),
            decimals: None,
        };
        Ok((!info.is_empty()).then_some(info))
    }

    fn name(&self) -> &'static str {
        "dexscreener"
    }
}
