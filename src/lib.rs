// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod aggregate;
pub mod api;
pub mod config;
pub mod decision;
pub mod enrich;
pub mod events;
pub mod metrics;
pub mod retry;
pub mod scrape;
pub mod sentiment;
pub mod store;
pub mod supervisor;
pub mod watcher;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{ScoreWeights, SentimentAggregator, TokenRecord};
pub use crate::decision::Verdict;
pub use crate::enrich::types::{CoinEntry, MarketProvider, PartialMarketInfo};
pub use crate::enrich::MarketEnricher;
pub use crate::events::{Event, EventBus, Stage};
pub use crate::scrape::types::Post;
pub use crate::scrape::ScrapeCoordinator;
pub use crate::store::Stores;
pub use crate::supervisor::{PipelineState, PipelineSupervisor};
