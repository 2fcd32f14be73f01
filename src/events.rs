//! Typed publish-subscribe bus.
//!
//! The supervisor, the store watcher, and the scrape workers publish here;
//! every connected duplex client subscribes. Delivery is best-effort: a
//! subscriber that falls behind loses its oldest pending events and sees a
//! `droppedEvents` marker instead, publishers never block.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::scrape::types::Post;

pub const BUS_CAPACITY: usize = 256;

/// Stage tag carried by log and error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scraper,
    Aggregator,
    Enricher,
    Supervisor,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Scraper => "scraper",
            Stage::Aggregator => "aggregator",
            Stage::Enricher => "enricher",
            Stage::Supervisor => "supervisor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    InitialSnapshot { posts: Vec<Post> },
    #[serde(rename_all = "camelCase")]
    ScrapeLog { stage: Stage, line: String },
    #[serde(rename_all = "camelCase")]
    ScrapeUpdate { posts: Vec<Post> },
    #[serde(rename_all = "camelCase")]
    ThreadUpdate { source_tag: String, line: String },
    #[serde(rename_all = "camelCase")]
    ScrapeStopped { exit_code: i32 },
    #[serde(rename_all = "camelCase")]
    CoinsUpdated { count: usize },
    #[serde(rename_all = "camelCase")]
    Error { stage: Stage, message: String },
    #[serde(rename_all = "camelCase")]
    DroppedEvents { count: u64 },
}

impl Event {
    /// Wire form: the tagged event with a `timestamp` field injected,
    /// `{type, timestamp, ...}`.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = v.as_object_mut() {
            map.insert(
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        v
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast to all current subscribers. No subscribers is fine.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Convenience for stage output lines: one tracing line for operators,
    /// one bus event for clients.
    pub fn stage_log(&self, stage: Stage, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(stage = %stage, "{line}");
        self.publish(Event::ScrapeLog { stage, line });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}
