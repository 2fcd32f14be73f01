// src/enrich/providers/moralis.rs
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::enrich::types::{MarketProvider, PartialMarketInfo, ProviderError, ProviderResult};

const SOLANA_GATEWAY: &str = "https://solana-gateway.moralis.io";

/// Metadata API keyed by mint address. Needs an address found by an
/// earlier provider; without one it is a miss. Disabled entirely when
/// `MORALIS_API_KEY` is not set.
pub struct MoralisProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    logo: Option<String>,
    #[serde(default, rename = "logoURI")]
    logo_uri: Option<String>,
    #[serde(default)]
    decimals: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Price {
    #[serde(default)]
    usd_price: Option<f64>,
    #[serde(default, rename = "24hrPercentChange")]
    percent_change_24h: Option<f64>,
}

impl MoralisProvider {
    pub fn from_env(http: reqwest::Client) -> Option<Self> {
        let api_key = std::env::var("MORALIS_API_KEY").ok()?;
        Some(Self {
            http,
            api_key,
            base_url: SOLANA_GATEWAY.to_string(),
        })
    }

    fn valid_address(address: &str) -> bool {
        static RE: OnceCell<regex::Regex> = OnceCell::new();
        let re = RE.get_or_init(|| regex::Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap());
        re.is_match(address)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ProviderResult<T> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .header("X-API-Key", &self.api_key)
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
        resp.json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))
    }
}

#[async_trait]
impl MarketProvider for MoralisProvider {
    async fn lookup(
        &self,
        _symbol: &str,
        known: &PartialMarketInfo,
    ) -> ProviderResult<Option<PartialMarketInfo>> {
        let Some(address) = known.address.as_deref() else {
            return Ok(None);
        };
        if !Self::valid_address(address) {
            return Ok(None);
        }

        let metadata: Metadata = self
            .get_json(&format!(
                "{}/token/mainnet/{address}/metadata",
                self.base_url
            ))
            .await?;
        // Price is best-effort; unpriced tokens still have metadata.
        let price: Option<Price> = match self
            .get_json(&format!("{}/token/mainnet/{address}/price", self.base_url))
            .await
        {
            Ok(p) => Some(p),
            Err(ProviderError::RateLimited) => return Err(ProviderError::RateLimited),
            Err(e) => {
                tracing::debug!(error = %e, address, "moralis price lookup missed");
                None
            }
        };

        // The gateway reports decimals as either a number or a string.
        let decimals = metadata.decimals.and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().map(|d| d as u32),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });

        let info = PartialMarketInfo {
            address: Some(address.to_string()),
            chain: Some("solana".to_string()),
            price_usd: price.as_ref().and_then(|p| p.usd_price),
            change24h: price.as_ref().and_then(|p| p.percent_change_24h),
            logo_url: metadata.logo_uri.or(metadata.logo),
            decimals,
        };
        Ok(Some(info))
    }

    fn name(&self) -> &'static str {
        "moralis"
    }
}
