use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::trace;

use super::model::{Event, EventKind};

const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

pub type SubscriberId = u64;

struct Subscriber {
    filter: Vec<EventKind>,
    tx: mpsc::Sender<Event>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.filter.is_empty() || self.filter.contains(&kind)
    }
}

/// Fan-out hub for engine events. A single instance is shared by C3 (RPC
/// streams, SSE), C4 (status-changed on connect/disconnect), and C5 (chat,
/// transfer, voice, notifications). Delivery is never allowed to block a
/// producer: a subscriber whose queue is full simply misses the event.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new subscriber with an optional event-type filter (empty
    /// means "deliver everything") and returns its id plus the receiving
    /// half. Callers must call `unsubscribe` on disconnect.
    pub async fn subscribe(&self, filter: Vec<EventKind>) -> (SubscriberId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { filter, tx });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }

    /// Delivers `event` to every subscriber whose filter admits it. A full
    /// outbound queue drops the event for that subscriber only; it is never
    /// an error and never blocks delivery to the others.
    pub async fn publish(&self, event: Event) {
        let kind = event.kind();
        let subscribers = self.subscribers.read().await;
        for (id, sub) in subscribers.iter() {
            if !sub.wants(kind) {
                continue;
            }
            if sub.tx.try_send(event.clone()).is_err() {
                trace!(subscriber_id = id, ?kind, "dropping event for full/closed subscriber");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
