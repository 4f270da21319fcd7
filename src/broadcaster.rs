//! Outbound delivery of committed price batches
//!
//! Decoupled from acquisition: the only coupling is "new data arrived".
//! Fresh batches go to the host-registered callback (e.g. a relay to UI
//! clients) and to any `broadcast` subscribers.

use crate::{
    constants::BROADCAST_CHANNEL_CAPACITY,
    types::{FeedEvent, PriceUpdate, SourceTier},
};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Callback registered by the host process at `start`
pub type BroadcastFn = Arc<dyn Fn(&[PriceUpdate]) + Send + Sync>;

/// Fans committed batches out to the registered callback and to subscribers
pub struct Broadcaster {
    callback: RwLock<Option<BroadcastFn>>,
    event_tx: broadcast::Sender<FeedEvent>,
}

impl Broadcaster {
    /// Creates a broadcaster with no registered callback
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            callback: RwLock::new(None),
            event_tx,
        }
    }

    /// Registers the host callback invoked on every committed batch
    pub fn register(&self, callback: BroadcastFn) {
        let mut slot = self.callback.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(callback);
    }

    /// Subscribes to feed events
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    /// Delivers a freshly committed batch
    pub(crate) fn publish_batch(&self, updates: Vec<PriceUpdate>) {
        if updates.is_empty() {
            return;
        }

        {
            let slot = self.callback.read().unwrap_or_else(|e| e.into_inner());
            if let Some(callback) = slot.as_ref() {
                callback(&updates);
            }
        }

        // Send fails only when there are no subscribers, which is fine.
        let _ = self.event_tx.send(FeedEvent::PriceBatch {
            id: Uuid::new_v4(),
            updates,
            timestamp: Utc::now(),
        });
    }

    /// Announces an active-source change
    pub(crate) fn publish_source_change(&self, previous: Option<SourceTier>, active: SourceTier) {
        let _ = self.event_tx.send(FeedEvent::SourceChanged {
            id: Uuid::new_v4(),
            previous,
            active,
            timestamp: Utc::now(),
        });
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
