// src/enrich/providers/jupiter.rs
use async_trait::async_trait;
use serde::Deserialize;

use crate::enrich::types::{MarketProvider, PartialMarketInfo, ProviderError, ProviderResult};

const TOKEN_LIST_URL: &str = "https://token.jup.ag/all";

/// Token-list registry. Keyless. No price data, but reliable for the mint
/// address, decimals and logo of listed tokens.
pub struct JupiterListProvider {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupToken {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    decimals: Option<u32>,
    #[serde(default, rename = "logoURI")]
    logo_uri: Option<String>,
}

impl JupiterListProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MarketProvider for JupiterListProvider {
    async fn lookup(
        &self,
        symbol: &str,
        _known: &PartialMarketInfo,
    ) -> ProviderResult<Option<PartialMarketInfo>> {
        let resp = self.http.get(TOKEN_LIST_URL).send().await?;
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
        let tokens: Vec<JupToken> = resp
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let Some(hit) = tokens.into_iter().find(|t| {
            t.symbol
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
        }) else {
            return Ok(None);
        };

        let info = PartialMarketInfo {
            address: hit.address,
            chain: Some("solana".to_string()),
            price_usd: None,
            change24h: None,
            logo_url: hit.logo_uri,
            decimals: hit.decimals,
        };
        Ok((!info.is_empty()).then_some(info))
    }

    fn name(&self) -> &'static str {
        "jupiter-list"
    }
}
