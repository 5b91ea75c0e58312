use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use ringside_types::api::{
    DirectMessageReceipt, DirectMessageRecord, IdKey, MessageRecord, NewDirectMessage, NewMessage,
};

/// Capacity of the channel between a feed transport and its consumer.
pub const FEED_BUFFER: usize = 256;

/// The shared backend: a `messages` table with an insert feed and a
/// `directmessages` table queried by id set.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Oldest-first by timestamp, at most `limit` rows.
    async fn fetch_messages(&self, limit: u32) -> Result<Vec<MessageRecord>>;

    /// Insert and return the stored row. `None` means the store accepted the
    /// write but returned nothing.
    async fn insert_message(&self, message: NewMessage) -> Result<Option<MessageRecord>>;

    /// Delete every message row.
    async fn delete_all_messages(&self) -> Result<()>;

    /// Start receiving rows inserted into `messages` by any client.
    async fn subscribe_message_inserts(&self) -> Result<FeedSubscription>;

    /// Rows whose id is in `ids`, in no particular order.
    async fn fetch_direct_messages(&self, ids: &[IdKey]) -> Result<Vec<DirectMessageRecord>>;

    /// Newest-first by creation time, at most `limit` rows.
    async fn fetch_recent_direct_messages(&self, limit: u32) -> Result<Vec<DirectMessageRecord>>;

    async fn insert_direct_message(&self, message: NewDirectMessage) -> Result<DirectMessageReceipt>;
}

/// A live insert feed. Dropping it (or calling [`unsubscribe`]) stops the
/// transport task that fills it.
///
/// [`unsubscribe`]: FeedSubscription::unsubscribe
pub struct FeedSubscription {
    rx: mpsc::Receiver<MessageRecord>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(rx: mpsc::Receiver<MessageRecord>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// A feed driven directly by whoever holds the sender.
    pub fn from_receiver(rx: mpsc::Receiver<MessageRecord>) -> Self {
        Self { rx, task: None }
    }

    /// Next inserted row, or `None` once the transport has gone away.
    pub async fn recv(&mut self) -> Option<MessageRecord> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            debug!("Releasing live feed transport");
            task.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
