//! The group chat engine.
//!
//! One task owns the canonical message list. Sends, insert results, feed
//! notifications and reloads all arrive as messages on that task, so each
//! mutation sees the list exactly as the previous one left it. Network calls
//! run on their own tasks and report back; any number of sends may be in
//! flight, each keyed by its temporary id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ringside_types::api::{MessageRecord, NewMessage};
use ringside_types::models::{Message, now_timestamp};

use crate::cache::LocalCache;
use crate::error::SyncError;
use crate::ids::TempIdAllocator;
use crate::merge::{self, MergeOutcome, Reconciled};
use crate::profile::ProfileStore;
use crate::remote::{FeedSubscription, RemoteStore};

const COMMAND_BUFFER: usize = 64;
const SIGNAL_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Rows fetched on (re)load.
    pub history_limit: u32,
    /// Same author and body within this window counts as the same message.
    pub echo_window: Duration,
    /// Longer bodies are cut to this many characters.
    pub max_body_chars: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            history_limit: 500,
            echo_window: Duration::from_secs(5),
            max_body_chars: 100,
        }
    }
}

/// One-shot UI cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSignal {
    /// The composer's text was taken by a send.
    ComposerCleared,
    /// Something was appended; the list view should follow the tail.
    ScrollToEnd,
}

enum Command {
    Send { body: String },
    Focus,
    Retry,
    Clear { reply: oneshot::Sender<Result<(), SyncError>> },
    Shutdown,
}

/// Results of network calls, posted back to the engine task.
enum Completion {
    Inserted {
        temp_id: String,
        result: Result<Option<MessageRecord>, String>,
    },
    Loaded {
        generation: u64,
        result: Result<Vec<MessageRecord>, String>,
    },
    Cleared {
        reply: oneshot::Sender<Result<(), SyncError>>,
        result: Result<(), String>,
    },
}

/// A running chat engine. Dropping every handle also stops it.
pub struct ChatSession {
    handle: ChatHandle,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Spawn the engine: hydrate from the cache, subscribe to the live feed,
    /// then load history from the store.
    pub fn start(
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        profile: ProfileStore,
        options: ChatOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = watch::channel(Vec::new());
        let (error_tx, error_rx) = watch::channel(None);
        let (signal_tx, _) = broadcast::channel(SIGNAL_BUFFER);

        let handle = ChatHandle {
            commands: command_tx,
            messages: messages_rx,
            errors: error_rx,
            signals: signal_tx.clone(),
            max_body_chars: options.max_body_chars,
        };

        let engine = ChatEngine {
            remote,
            cache,
            profile,
            options,
            temp_ids: TempIdAllocator::new(),
            messages: Vec::new(),
            pending: HashSet::new(),
            arrived_since_reload: HashSet::new(),
            hidden: HashSet::new(),
            reload_generation: 0,
            messages_tx,
            error_tx,
            signal_tx,
            completion_tx,
        };

        let task = tokio::spawn(engine.run(command_rx, completion_rx));
        Self { handle, task }
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Stop the engine and release the live feed. In-flight inserts are not
    /// cancelled; their results are discarded.
    pub async fn shutdown(self) {
        let _ = self.handle.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Chat engine task ended abnormally: {}", e);
        }
    }
}

/// The UI-facing side of a [`ChatSession`].
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<Command>,
    messages: watch::Receiver<Vec<Message>>,
    errors: watch::Receiver<Option<SyncError>>,
    signals: broadcast::Sender<ChatSignal>,
    max_body_chars: usize,
}

impl ChatHandle {
    /// Queue a message. Blank text is ignored. Returns whether a send was queued.
    pub async fn send(&self, text: &str) -> bool {
        let Some(body) = prepare_body(text, self.max_body_chars) else {
            return false;
        };
        self.dispatch(Command::Send { body }).await
    }

    /// The screen regained focus: re-read the profile and reload history.
    pub async fn on_focus(&self) {
        self.dispatch(Command::Focus).await;
    }

    /// Dismiss the error banner, re-establish the feed if it is down, reload.
    pub async fn retry(&self) {
        self.dispatch(Command::Retry).await;
    }

    /// Delete every message in the store, then locally. Local state is only
    /// touched once the store has confirmed.
    pub async fn clear(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        if !self.dispatch(Command::Clear { reply }).await {
            return Err(SyncError::RemoteWrite("chat session has stopped".into()));
        }
        rx.await
            .unwrap_or_else(|_| Err(SyncError::RemoteWrite("chat session has stopped".into())))
    }

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn errors(&self) -> watch::Receiver<Option<SyncError>> {
        self.errors.clone()
    }

    pub fn signals(&self) -> broadcast::Receiver<ChatSignal> {
        self.signals.subscribe()
    }

    async fn dispatch(&self, command: Command) -> bool {
        if self.commands.send(command).await.is_err() {
            warn!("Chat engine is not running; command dropped");
            return false;
        }
        true
    }
}

struct ChatEngine {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    profile: ProfileStore,
    options: ChatOptions,
    temp_ids: TempIdAllocator,

    /// The canonical list. Only this task touches it.
    messages: Vec<Message>,
    /// Temporary ids whose insert has not resolved.
    pending: HashSet<String>,
    /// Ids appended from the feed or confirmed by an insert since the last
    /// reload was issued. A reload answer may predate them.
    arrived_since_reload: HashSet<String>,
    /// Ids withheld from view after a failed reload. They stay in the list
    /// and the cache until a reload succeeds.
    hidden: HashSet<String>,
    reload_generation: u64,

    messages_tx: watch::Sender<Vec<Message>>,
    error_tx: watch::Sender<Option<SyncError>>,
    signal_tx: broadcast::Sender<ChatSignal>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl ChatEngine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        self.hydrate().await;
        let mut feed = self.subscribe().await;
        self.start_reload();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(Command::Retry) => {
                        self.set_error(None);
                        if feed.is_none() {
                            feed = self.subscribe().await;
                        }
                        self.start_reload();
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(done) = completions.recv() => self.handle_completion(done).await,
                record = next_feed_record(&mut feed) => match record {
                    Some(record) => self.merge_feed(record).await,
                    None => {
                        warn!("Live feed closed; continuing without realtime updates");
                        feed = None;
                        self.set_error(Some(SyncError::subscription("live feed closed")));
                    }
                },
            }
        }

        if let Some(feed) = feed {
            feed.unsubscribe();
        }
        info!("Chat engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { body } => self.send(body).await,
            Command::Focus => {
                let profile = self.profile.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || profile.reload()).await {
                    error!("spawn_blocking join error: {}", e);
                }
                self.start_reload();
            }
            Command::Clear { reply } => self.start_clear(reply),
            // Handled by the run loop, which owns the feed.
            Command::Retry | Command::Shutdown => {}
        }
    }

    async fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Inserted { temp_id, result } => self.finish_insert(temp_id, result).await,
            Completion::Loaded { generation, result } => self.finish_reload(generation, result).await,
            Completion::Cleared { reply, result } => self.finish_clear(reply, result).await,
        }
    }

    // -- Startup --

    async fn hydrate(&mut self) {
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.load_messages()).await {
            Ok(cached) => {
                debug!("Hydrated {} messages from cache", cached.len());
                self.messages = cached;
                self.publish();
            }
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }

    async fn subscribe(&self) -> Option<FeedSubscription> {
        match self.remote.subscribe_message_inserts().await {
            Ok(feed) => {
                info!("Subscribed to message inserts");
                Some(feed)
            }
            Err(e) => {
                let err = SyncError::subscription(format!("{:#}", e));
                warn!("{}", err);
                self.set_error(Some(err));
                None
            }
        }
    }

    // -- Optimistic send --

    async fn send(&mut self, body: String) {
        let profile = self.profile.get();
        let temp_id = self.temp_ids.next();
        let message = Message {
            id: temp_id.clone(),
            author: profile.display_name,
            body,
            timestamp: now_timestamp(),
            color: profile.color_tag,
        };
        let payload = NewMessage::from(&message);

        self.messages.push(message);
        self.pending.insert(temp_id.clone());
        self.publish();
        self.signal(ChatSignal::ComposerCleared);
        self.persist().await;
        self.signal(ChatSignal::ScrollToEnd);

        debug!("Inserting message {}", temp_id);
        let remote = self.remote.clone();
        let done = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = remote.insert_message(payload).await.map_err(|e| format!("{:#}", e));
            let _ = done.send(Completion::Inserted { temp_id, result });
        });
    }

    async fn finish_insert(&mut self, temp_id: String, result: Result<Option<MessageRecord>, String>) {
        self.pending.remove(&temp_id);

        // Whatever stays in the list from here on must outlive a reload that
        // was issued before this insert returned.
        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Insert for {} returned no row; keeping the local entry", temp_id);
                self.arrived_since_reload.insert(temp_id);
                return;
            }
            Err(e) => {
                warn!("Failed to save message {} to the store: {}", temp_id, e);
                self.hidden.remove(&temp_id);
                if merge::roll_back(&mut self.messages, &temp_id) {
                    self.publish();
                    self.persist().await;
                }
                self.set_error(Some(SyncError::RemoteWrite(e)));
                return;
            }
        };

        let Some(canonical_id) = record.canonical_id() else {
            warn!("Insert for {} returned a row without an id", temp_id);
            self.arrived_since_reload.insert(temp_id);
            return;
        };

        match merge::reconcile(&mut self.messages, &temp_id, &canonical_id, record.timestamp) {
            Reconciled::Rewritten => {
                debug!("Message {} confirmed as {}", temp_id, canonical_id);
                if self.hidden.remove(&temp_id) {
                    self.hidden.insert(canonical_id.clone());
                }
            }
            Reconciled::Superseded => {
                debug!("Message {} already present as {}", temp_id, canonical_id);
                self.hidden.remove(&temp_id);
            }
            Reconciled::Missing => {
                debug!("Message {} left the list before {} confirmed it", temp_id, canonical_id);
                return;
            }
        }
        self.arrived_since_reload.insert(canonical_id);
        self.publish();
        self.persist().await;
    }

    // -- Live feed --

    async fn merge_feed(&mut self, record: MessageRecord) {
        let Some(candidate) = record.into_message() else {
            return;
        };
        let id = candidate.id.clone();

        match merge::merge_incoming(&mut self.messages, candidate, self.options.echo_window) {
            MergeOutcome::Appended => {
                self.arrived_since_reload.insert(id);
                self.publish();
                self.persist().await;
                self.signal(ChatSignal::ScrollToEnd);
            }
            MergeOutcome::KnownId => debug!("Feed delivered known message {}", id),
            MergeOutcome::Echo { existing_id } => {
                debug!("Feed message {} is an echo of {}", id, existing_id)
            }
        }
    }

    // -- Reload --

    fn start_reload(&mut self) {
        self.reload_generation += 1;
        self.arrived_since_reload.clear();

        let generation = self.reload_generation;
        let limit = self.options.history_limit;
        let remote = self.remote.clone();
        let done = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = remote.fetch_messages(limit).await.map_err(|e| format!("{:#}", e));
            let _ = done.send(Completion::Loaded { generation, result });
        });
    }

    async fn finish_reload(&mut self, generation: u64, result: Result<Vec<MessageRecord>, String>) {
        if generation != self.reload_generation {
            debug!("Ignoring superseded reload {}", generation);
            return;
        }

        match result {
            Ok(records) => {
                let loaded: Vec<Message> = records.into_iter().filter_map(MessageRecord::into_message).collect();
                info!("Loaded {} messages from the store", loaded.len());

                let pending = &self.pending;
                let recent = &self.arrived_since_reload;
                self.messages = merge::merge_reload(
                    &self.messages,
                    loaded,
                    |m| pending.contains(&m.id) || recent.contains(&m.id),
                    self.options.echo_window,
                );
                self.hidden.clear();
                self.publish();
                self.persist().await;

                let keep_notice = matches!(*self.error_tx.borrow(), Some(SyncError::Subscription(_)));
                if !keep_notice {
                    self.set_error(None);
                }
            }
            Err(e) => {
                warn!("Store load failed: {}", e);
                // Show nothing rather than a stale list. The entries stay in
                // memory and in the cache for the next successful reload.
                self.hidden = self.messages.iter().map(|m| m.id.clone()).collect();
                self.publish();
                self.set_error(Some(SyncError::RemoteRead(e)));
            }
        }
    }

    // -- Clear --

    fn start_clear(&mut self, reply: oneshot::Sender<Result<(), SyncError>>) {
        self.set_error(None);
        let remote = self.remote.clone();
        let done = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = remote.delete_all_messages().await.map_err(|e| format!("{:#}", e));
            let _ = done.send(Completion::Cleared { reply, result });
        });
    }

    async fn finish_clear(&mut self, reply: oneshot::Sender<Result<(), SyncError>>, result: Result<(), String>) {
        let outcome = match result {
            Ok(()) => {
                info!("Cleared all messages");
                self.messages.clear();
                self.arrived_since_reload.clear();
                self.hidden.clear();
                self.publish();
                self.persist().await;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to clear messages in the store: {}", e);
                let err = SyncError::RemoteWrite(e);
                self.set_error(Some(err.clone()));
                Err(err)
            }
        };
        let _ = reply.send(outcome);
    }

    // -- Outputs --

    fn publish(&self) {
        let visible = self
            .messages
            .iter()
            .filter(|m| !self.hidden.contains(&m.id))
            .cloned()
            .collect();
        self.messages_tx.send_replace(visible);
    }

    fn set_error(&self, error: Option<SyncError>) {
        self.error_tx.send_replace(error);
    }

    fn signal(&self, signal: ChatSignal) {
        // No subscribers is fine.
        let _ = self.signal_tx.send(signal);
    }

    /// Write the current list to the cache. Failure is logged by the cache
    /// and never undoes the in-memory change.
    async fn persist(&self) {
        let cache = self.cache.clone();
        let snapshot = self.messages.clone();
        match tokio::task::spawn_blocking(move || cache.save_messages(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Continuing in memory only: {}", e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }
}

async fn next_feed_record(feed: &mut Option<FeedSubscription>) -> Option<MessageRecord> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

/// Trim, drop if blank, cut to the composer limit.
fn prepare_body(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_bodies_are_rejected() {
        assert_eq!(prepare_body("", 100), None);
        assert_eq!(prepare_body("   \n\t", 100), None);
    }

    #[test]
    fn bodies_are_trimmed_and_limited() {
        assert_eq!(prepare_body("  jab cross  ", 100).as_deref(), Some("jab cross"));
        assert_eq!(prepare_body("ééééé", 3).as_deref(), Some("ééé"));
    }
}
