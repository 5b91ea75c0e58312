#![allow(dead_code)]

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};

use ringside_sync::remote::{FEED_BUFFER, FeedSubscription, RemoteStore};
use ringside_types::api::{
    DirectMessageReceipt, DirectMessageRecord, IdKey, MessageRecord, NewDirectMessage, NewMessage,
};

/// Scripted remote store: rows live in memory, failures are switched on per
/// operation, and inserts can be held until the test releases them. Reads
/// see the rows as they were when the request arrived, even when their
/// answer is held.
pub struct FakeRemote {
    state: Mutex<State>,
    feed: Mutex<Option<mpsc::Sender<MessageRecord>>>,
    gate: Semaphore,
    hold_inserts: AtomicBool,
    fetch_gate: Semaphore,
    hold_fetches: AtomicBool,
    dm_gate: Semaphore,
    held_dm_fetches: AtomicUsize,
    echo_inserts: AtomicBool,

    pub fail_inserts: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_dm_insert: AtomicBool,
    pub fail_dm_fetch: AtomicBool,

    fetches: AtomicUsize,
    dm_queries: AtomicUsize,
}

#[derive(Default)]
struct State {
    messages: Vec<MessageRecord>,
    next_message_id: u64,
    inserted: Vec<NewMessage>,
    direct: Vec<DirectMessageRecord>,
    next_direct_id: i64,
    dm_payloads: Vec<NewDirectMessage>,
    last_dm_keys: Vec<IdKey>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            feed: Mutex::new(None),
            gate: Semaphore::new(0),
            hold_inserts: AtomicBool::new(false),
            fetch_gate: Semaphore::new(0),
            hold_fetches: AtomicBool::new(false),
            dm_gate: Semaphore::new(0),
            held_dm_fetches: AtomicUsize::new(0),
            echo_inserts: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_dm_insert: AtomicBool::new(false),
            fail_dm_fetch: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            dm_queries: AtomicUsize::new(0),
        }
    }

    /// Push every successful insert into the live feed, like a real backend.
    pub fn with_feed_echo(self) -> Self {
        self.echo_inserts.store(true, Ordering::SeqCst);
        self
    }

    pub fn hold_inserts(&self) {
        self.hold_inserts.store(true, Ordering::SeqCst);
    }

    pub fn release_inserts(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn hold_fetches(&self) {
        self.hold_fetches.store(true, Ordering::SeqCst);
    }

    pub fn release_fetches(&self, n: usize) {
        self.fetch_gate.add_permits(n);
    }

    /// Hold the answers of the next `n` direct message lookups.
    pub fn hold_dm_fetches(&self, n: usize) {
        self.held_dm_fetches.store(n, Ordering::SeqCst);
    }

    pub fn release_dm_fetches(&self, n: usize) {
        self.dm_gate.add_permits(n);
    }

    pub fn seed_message(&self, id: &str, user: &str, content: &str, timestamp: &str) {
        let mut state = self.lock();
        state.messages.push(record(id, user, content, timestamp));
    }

    pub fn seed_direct(&self, id: serde_json::Value, username: &str, usermsg: &str, created_at: &str) {
        let mut state = self.lock();
        state.direct.push(DirectMessageRecord {
            id: Some(id),
            username: Some(username.to_string()),
            usermsg: Some(usermsg.to_string()),
            created_at: Some(created_at.to_string()),
            ..Default::default()
        });
    }

    pub fn set_next_direct_id(&self, id: i64) {
        self.lock().next_direct_id = id;
    }

    pub fn stored_messages(&self) -> Vec<MessageRecord> {
        self.lock().messages.clone()
    }

    pub fn inserted(&self) -> Vec<NewMessage> {
        self.lock().inserted.clone()
    }

    pub fn dm_payloads(&self) -> Vec<NewDirectMessage> {
        self.lock().dm_payloads.clone()
    }

    pub fn last_dm_keys(&self) -> Vec<IdKey> {
        self.lock().last_dm_keys.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn dm_query_count(&self) -> usize {
        self.dm_queries.load(Ordering::SeqCst)
    }

    /// Deliver a row on the live feed as if another client inserted it.
    pub async fn push_feed(&self, record: MessageRecord) {
        let sender = self.feed.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(record).await;
        }
    }

    /// End the live feed from the store side.
    pub fn close_feed(&self) {
        self.feed.lock().unwrap().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

pub fn record(id: &str, user: &str, content: &str, timestamp: &str) -> MessageRecord {
    MessageRecord {
        id: Some(json!(id)),
        user: Some(user.to_string()),
        content: Some(content.to_string()),
        timestamp: Some(timestamp.to_string()),
        color: Some("#ffffff".to_string()),
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch_messages(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<MessageRecord> = self.lock().messages.iter().take(limit as usize).cloned().collect();
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.fetch_gate.acquire().await?.forget();
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<MessageRecord>> {
        self.lock().inserted.push(message.clone());

        if self.hold_inserts.load(Ordering::SeqCst) {
            self.gate.acquire().await?.forget();
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("insert rejected: network down"));
        }

        let row = {
            let mut state = self.lock();
            state.next_message_id += 1;
            let row = MessageRecord {
                id: Some(json!(format!("row-{}", state.next_message_id))),
                user: Some(message.user),
                content: Some(message.content),
                timestamp: Some(message.timestamp),
                color: Some(message.color),
            };
            state.messages.push(row.clone());
            row
        };

        if self.echo_inserts.load(Ordering::SeqCst) {
            self.push_feed(row.clone()).await;
        }
        Ok(Some(row))
    }

    async fn delete_all_messages(&self) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(anyhow!("delete rejected"));
        }
        self.lock().messages.clear();
        Ok(())
    }

    async fn subscribe_message_inserts(&self) -> Result<FeedSubscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(anyhow!("socket closed during join"));
        }
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(FeedSubscription::from_receiver(rx))
    }

    async fn fetch_direct_messages(&self, ids: &[IdKey]) -> Result<Vec<DirectMessageRecord>> {
        self.dm_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_dm_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let rows: Vec<DirectMessageRecord> = {
            let mut state = self.lock();
            state.last_dm_keys = ids.to_vec();
            let wanted: Vec<String> = ids.iter().map(IdKey::as_text).collect();
            state
                .direct
                .iter()
                .filter(|row| row.key().is_some_and(|key| wanted.contains(&key)))
                .cloned()
                .collect()
        };
        let held = self
            .held_dm_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if held {
            self.dm_gate.acquire().await?.forget();
        }
        Ok(rows)
    }

    async fn fetch_recent_direct_messages(&self, limit: u32) -> Result<Vec<DirectMessageRecord>> {
        self.dm_queries.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.lock().direct.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn insert_direct_message(&self, message: NewDirectMessage) -> Result<DirectMessageReceipt> {
        if self.fail_dm_insert.load(Ordering::SeqCst) {
            return Err(anyhow!("insert rejected: network down"));
        }

        let mut state = self.lock();
        state.dm_payloads.push(message.clone());
        let id = match message.id {
            Some(id) => id,
            None => {
                state.next_direct_id += 1;
                state.next_direct_id
            }
        };
        let created_at = format!("2024-05-01T10:00:{:02}.000Z", state.direct.len());
        state.direct.push(DirectMessageRecord {
            id: Some(json!(id)),
            username: Some(message.username),
            usermsg: Some(message.usermsg),
            created_at: Some(created_at.clone()),
            deviceid: Some(message.deviceid),
            devicename: Some(message.devicename),
            sysver: Some(message.sysver),
            istablet: Some(message.istablet),
            ..Default::default()
        });
        Ok(DirectMessageReceipt {
            id: json!(id),
            created_at: Some(created_at),
        })
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}
