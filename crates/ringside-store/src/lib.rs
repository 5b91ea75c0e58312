//! A self-contained backend: both tables live in a local SQLite database and
//! inserts are pushed to subscribers through an in-process dispatcher.
//! Sessions sharing one `EmbeddedStore` see each other's messages live.

pub mod dispatcher;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ringside_db::Database;
use ringside_db::models::{DirectMessageRow, MessageRow, NewDirectMessageRow, RowKey};
use ringside_sync::remote::{FEED_BUFFER, FeedSubscription, RemoteStore};
use ringside_types::api::{
    DirectMessageReceipt, DirectMessageRecord, IdKey, MessageRecord, NewDirectMessage, NewMessage,
};
use ringside_types::events::{FeedEvent, MESSAGES_TABLE};
use ringside_types::models::now_timestamp;

pub use dispatcher::Dispatcher;

#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl EmbeddedStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Attach an admin reply to a direct message. Returns false if the id
    /// matched no row.
    pub async fn reply_to_direct_message(&self, id: &str, reply: &str) -> Result<bool> {
        let id: i64 = id.parse().map_err(|_| anyhow!("direct message id {} is not an integer", id))?;
        let reply = reply.to_string();
        let db = self.db.clone();
        let replied = blocking(move || db.set_admin_reply(id, &reply, &now_timestamp())).await?;
        if replied {
            info!("Admin replied to direct message {}", id);
        }
        Ok(replied)
    }
}

#[async_trait]
impl RemoteStore for EmbeddedStore {
    async fn fetch_messages(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        let db = self.db.clone();
        let rows = blocking(move || db.get_messages(limit)).await?;
        Ok(rows.into_iter().map(message_record).collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<MessageRecord>> {
        let db = self.db.clone();
        let row = blocking(move || {
            let id = Uuid::new_v4().to_string();
            db.insert_message(&id, &message.user, &message.content, &message.timestamp, &message.color)
        })
        .await?;

        debug!("Stored message {} from {}", row.id, row.user);
        let record = message_record(row);
        self.dispatcher.broadcast(FeedEvent::MessageInsert {
            record: record.clone(),
        });
        Ok(Some(record))
    }

    async fn delete_all_messages(&self) -> Result<()> {
        let db = self.db.clone();
        let deleted = blocking(move || db.delete_all_messages()).await?;
        info!("Deleted {} messages", deleted);
        self.dispatcher.broadcast(FeedEvent::MessagesCleared { deleted });
        Ok(())
    }

    async fn subscribe_message_inserts(&self) -> Result<FeedSubscription> {
        let (id, mut events) = self.dispatcher.register(MESSAGES_TABLE).await;
        let registration = Registration {
            dispatcher: self.dispatcher.clone(),
            id,
        };
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let task = tokio::spawn(async move {
            let _registration = registration;
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Feed subscriber lagged by {} events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if event.table() != MESSAGES_TABLE {
                    continue;
                }
                if let FeedEvent::MessageInsert { record } = event {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(FeedSubscription::new(rx, task))
    }

    async fn fetch_direct_messages(&self, ids: &[IdKey]) -> Result<Vec<DirectMessageRecord>> {
        let keys: Vec<RowKey> = ids.iter().map(row_key).collect();
        let db = self.db.clone();
        let rows = blocking(move || db.get_direct_messages(&keys)).await?;
        Ok(rows.into_iter().map(direct_message_record).collect())
    }

    async fn fetch_recent_direct_messages(&self, limit: u32) -> Result<Vec<DirectMessageRecord>> {
        let db = self.db.clone();
        let rows = blocking(move || db.recent_direct_messages(limit)).await?;
        Ok(rows.into_iter().map(direct_message_record).collect())
    }

    async fn insert_direct_message(&self, message: NewDirectMessage) -> Result<DirectMessageReceipt> {
        let db = self.db.clone();
        let row = blocking(move || {
            db.insert_direct_message(&NewDirectMessageRow {
                id: message.id,
                username: &message.username,
                usermsg: &message.usermsg,
                deviceid: &message.deviceid,
                devicename: &message.devicename,
                istablet: message.istablet,
                sysver: &message.sysver,
            })
        })
        .await?;

        info!("Direct message {} from {}", row.id, row.username);
        let receipt = DirectMessageReceipt {
            id: json!(row.id),
            created_at: Some(row.created_at.clone()),
        };
        self.dispatcher.broadcast(FeedEvent::DirectMessageInsert {
            record: direct_message_record(row),
        });
        Ok(receipt)
    }
}

/// Releases a dispatcher registration when the forwarding task ends or is
/// aborted.
struct Registration {
    dispatcher: Dispatcher,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let dispatcher = self.dispatcher.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { dispatcher.unregister(id).await });
        }
    }
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow!("storage task failed: {}", e)
    })?
}

/// Text keys that are really integers still match the INTEGER id column.
fn row_key(key: &IdKey) -> RowKey {
    match key {
        IdKey::Numeric(n) => RowKey::Integer(*n),
        IdKey::Text(s) => match s.parse::<i64>() {
            Ok(n) if n.to_string() == *s => RowKey::Integer(n),
            _ => RowKey::Text(s.clone()),
        },
    }
}

fn message_record(row: MessageRow) -> MessageRecord {
    MessageRecord {
        id: Some(Value::String(row.id)),
        user: Some(row.user),
        content: Some(row.content),
        timestamp: Some(row.timestamp),
        color: Some(row.color),
    }
}

fn direct_message_record(row: DirectMessageRow) -> DirectMessageRecord {
    DirectMessageRecord {
        id: Some(json!(row.id)),
        username: Some(row.username),
        usermsg: Some(row.usermsg),
        created_at: Some(row.created_at),
        adminmsg: row.adminmsg,
        admintime: row.admintime,
        devicename: row.devicename,
        deviceid: row.deviceid,
        sysver: row.sysver,
        istablet: Some(row.istablet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_like_text_keys_match_integer_ids() {
        assert_eq!(
            row_key(&IdKey::Text("9007199254740995".into())),
            RowKey::Integer(9_007_199_254_740_995)
        );
        assert_eq!(row_key(&IdKey::Text("abc".into())), RowKey::Text("abc".into()));
        assert_eq!(row_key(&IdKey::Numeric(4)), RowKey::Integer(4));
    }

    #[tokio::test]
    async fn admin_reply_shows_up_in_lookups() {
        let store = EmbeddedStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let receipt = store
            .insert_direct_message(NewDirectMessage {
                id: None,
                deviceid: "d1".into(),
                devicename: "ring-laptop".into(),
                istablet: false,
                sysver: "linux x86_64".into(),
                username: "ana".into(),
                usermsg: "gloves?".into(),
            })
            .await
            .unwrap();
        let id = receipt.key().unwrap();

        assert!(store.reply_to_direct_message(&id, "on the bench").await.unwrap());
        assert!(!store.reply_to_direct_message("999", "nobody").await.unwrap());

        let rows = store.fetch_direct_messages(&[IdKey::Numeric(id.parse().unwrap())]).await.unwrap();
        assert_eq!(rows[0].adminmsg.as_deref(), Some("on the bench"));
        assert!(rows[0].admintime.is_some());
    }

    #[tokio::test]
    async fn released_feeds_unregister() {
        let store = EmbeddedStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let feed = store.subscribe_message_inserts().await.unwrap();
        assert_eq!(store.dispatcher().subscriber_count(MESSAGES_TABLE).await, 1);

        feed.unsubscribe();
        for _ in 0..50 {
            if store.dispatcher().subscriber_count(MESSAGES_TABLE).await == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("subscription was never released");
    }
}
