// src/watcher.rs
use std::sync::Arc;
use std::time::SystemTime;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus};
use crate::scrape::types::Post;
use crate::store::Stores;
use crate::supervisor::PipelineSupervisor;

/// (mtime, len) fingerprint; `None` while the file does not exist.
type FileSig = Option<(Option<SystemTime>, u64)>;

/// Poll the scrape document for changes. On change, hand the notification
/// to the supervisor (which debounces and gates on its state) and push the
/// current contents to subscribers. Only the scrape document is watched;
/// the documents the pipeline writes downstream are excluded by
/// construction.
pub fn spawn_store_watcher(
    stores: Arc<Stores>,
    supervisor: Arc<PipelineSupervisor>,
    bus: EventBus,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last: Option<FileSig> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sig: FileSig = match tokio::fs::metadata(stores.posts.path()).await {
                Ok(meta) => Some((meta.modified().ok(), meta.len())),
                Err(_) => None,
            };

            match &last {
                // First observation is the baseline, not a change.
                None => last = Some(sig),
                Some(prev) if *prev != sig => {
                    last = Some(sig);
                    tracing::debug!("scrape store changed");
                    supervisor.notify_file_changed();
                    let posts: Vec<Post> = stores.posts.read_array().await.unwrap_or_default();
                    bus.publish(Event::ScrapeUpdate { posts });
                }
                Some(_) => {}
            }
        }
    })
}
