use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use ringside_types::events::FeedEvent;

const BROADCAST_CAPACITY: usize = 1024;

/// Fans out change events to every live subscription on this store.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber receives every event and filters by table itself.
    broadcast_tx: broadcast::Sender<FeedEvent>,

    /// Live subscriptions: subscription id -> table
    subscriptions: RwLock<HashMap<Uuid, &'static str>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                subscriptions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Raw event stream, unfiltered.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event. Nobody listening is not an error.
    pub fn broadcast(&self, event: FeedEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a subscription to `table`. Returns (subscription_id, receiver).
    pub async fn register(&self, table: &'static str) -> (Uuid, broadcast::Receiver<FeedEvent>) {
        let id = Uuid::new_v4();
        let rx = self.subscribe();
        self.inner.subscriptions.write().await.insert(id, table);
        debug!("Subscription {} registered on {}", id, table);
        (id, rx)
    }

    pub async fn unregister(&self, id: Uuid) {
        if self.inner.subscriptions.write().await.remove(&id).is_some() {
            debug!("Subscription {} released", id);
        }
    }

    /// Number of live subscriptions on `table`.
    pub async fn subscriber_count(&self, table: &str) -> usize {
        self.inner
            .subscriptions
            .read()
            .await
            .values()
            .filter(|t| **t == table)
            .count()
    }
}
