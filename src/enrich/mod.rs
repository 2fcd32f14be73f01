// src/enrich/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::time::Instant;

use crate::aggregate::TokenRecord;
use crate::enrich::providers::dexscreener::DexScreenerProvider;
use crate::enrich::providers::jupiter::JupiterListProvider;
use crate::enrich::providers::moralis::MoralisProvider;
use crate::enrich::types::{CoinEntry, MarketProvider, PartialMarketInfo, ProviderError};
use crate::retry::BackoffPolicy;
use crate::store::Stores;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("enrich_runs_total", "Enrichment passes completed.");
        describe_counter!("enrich_provider_errors_total", "Failed provider lookups.");
        describe_counter!(
            "enrich_provider_rate_limited_total",
            "Lookups rejected with a rate-limit signal."
        );
    });
}

/// Ordered provider chain with per-symbol parallelism, per-call timeouts
/// and a per-provider cool-down after rate limits.
pub struct MarketEnricher {
    providers: Vec<Arc<dyn MarketProvider>>,
    parallelism: usize,
    call_timeout: Duration,
    cooldown: Duration,
    cooldowns: Mutex<HashMap<&'static str, Instant>>,
    policy: BackoffPolicy,
}

impl MarketEnricher {
    pub fn new(
        providers: Vec<Arc<dyn MarketProvider>>,
        parallelism: usize,
        call_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            providers,
            parallelism: parallelism.max(1),
            call_timeout,
            cooldown,
            cooldowns: Mutex::new(HashMap::new()),
            policy: BackoffPolicy::default(),
        }
    }

    /// The production chain: DexScreener, the Jupiter token list, then
    /// Moralis when its key is present. A missing credential disables
    /// exactly that provider; the chain continues with the rest.
    pub fn default_chain(
        parallelism: usize,
        call_timeout: Duration,
        cooldown: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("building enrichment HTTP client")?;
        let mut providers: Vec<Arc<dyn MarketProvider>> = vec![
            Arc::new(DexScreenerProvider::new(http.clone())),
            Arc::new(JupiterListProvider::new(http.clone())),
        ];
        match MoralisProvider::from_env(http) {
            Some(p) => providers.push(Arc::new(p)),
            None => tracing::info!("MORALIS_API_KEY not set, metadata provider disabled"),
        }
        Ok(Self::new(providers, parallelism, call_timeout, cooldown))
    }

    /// Read the sentiment document, enrich every record, replace the coin
    /// document. Returns the number of entries written.
    pub async fn run(&self, stores: &Stores) -> Result<usize> {
        ensure_metrics_described();
        let records: Vec<TokenRecord> = stores
            .sentiment
            .read_array()
            .await
            .context("reading sentiment document")?;
        let entries = self.enrich_all(records).await;
        stores
            .coins
            .replace(&entries)
            .await
            .context("writing coin document")?;
        counter!("enrich_runs_total").increment(1);
        tracing::info!(coins = entries.len(), "market enrichment finished");
        Ok(entries.len())
    }

    /// Enrich all records with bounded parallelism, preserving input order.
    pub async fn enrich_all(&self, records: Vec<TokenRecord>) -> Vec<CoinEntry> {
        stream::iter(records.into_iter().map(|r| self.enrich_one(r)))
            .buffered(self.parallelism)
            .collect()
            .await
    }

    /// Walk the chain in order, taking each still-missing field from the
    /// first provider that supplies it. Every record produces an entry,
    /// even when all providers miss.
    pub async fn enrich_one(&self, record: TokenRecord) -> CoinEntry {
        let mut acc = PartialMarketInfo::default();

        for provider in &self.providers {
            if acc.is_complete() {
                break;
            }
            if self.on_cooldown(provider.name()) {
                tracing::debug!(provider = provider.name(), "skipping provider on cool-down");
                continue;
            }
            match self.lookup(provider.as_ref(), &record.symbol, &acc).await {
                Ok(Some(part)) if !part.is_empty() => acc.fill_missing_from(part),
                Ok(_) => {}
                Err(ProviderError::RateLimited) => {
                    counter!("enrich_provider_rate_limited_total").increment(1);
                    self.start_cooldown(provider.name());
                }
                Err(e) => {
                    counter!("enrich_provider_errors_total").increment(1);
                    tracing::warn!(
                        provider = provider.name(),
                        symbol = %record.symbol,
                        error = %e,
                        "provider lookup failed"
                    );
                }
            }
        }

        // An address without an explicit chain is a solana mint here.
        if acc.address.is_some() && acc.chain.is_none() {
            acc.chain = Some("solana".to_string());
        }

        let latest_post = record.posts.iter().max_by_key(|p| p.timestamp).cloned();

        CoinEntry {
            token: record,
            address: acc.address,
            chain: acc.chain,
            price_usd: acc.price_usd,
            change24h: acc.change24h,
            logo_url: acc.logo_url,
            decimals: acc.decimals,
            latest_post,
        }
    }

    /// One provider call with timeout and backoff. A rate-limit signal is
    /// returned immediately so the caller can start the cool-down instead
    /// of hammering the provider.
    async fn lookup(
        &self,
        provider: &dyn MarketProvider,
        symbol: &str,
        known: &PartialMarketInfo,
    ) -> Result<Option<PartialMarketInfo>, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(self.call_timeout, provider.lookup(symbol, known))
                .await
                .unwrap_or_else(|_| Err(ProviderError::Network("call timed out".into())));
            match outcome {
                Ok(v) => return Ok(v),
                Err(ProviderError::RateLimited) => return Err(ProviderError::RateLimited),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    let delay = self.policy.delay(attempt - 1);
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn on_cooldown(&self, name: &'static str) -> bool {
        let cooldowns = self.cooldowns.lock().expect("cooldown mutex poisoned");
        cooldowns
            .get(name)
            .is_some_and(|until| Instant::now() < *until)
    }

    fn start_cooldown(&self, name: &'static str) {
        let until = Instant::now() + self.cooldown;
        let mut cooldowns = self.cooldowns.lock().expect("cooldown mutex poisoned");
        cooldowns.insert(name, until);
        tracing::warn!(provider = name, cooldown_secs = self.cooldown.as_secs(), "provider on cool-down");
    }
}
