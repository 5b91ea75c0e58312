//! The direct (contact) message panel.
//!
//! Nothing is shown optimistically here: a message appears only once the
//! store has confirmed it and the window has been re-resolved. The panel
//! remembers which rows this client created as an ordered set of ids.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ringside_types::api::NewDirectMessage;
use ringside_types::models::{DeviceInfo, DirectMessage};

use crate::cache::LocalCache;
use crate::device;
use crate::error::SyncError;
use crate::ids;
use crate::profile::ProfileStore;
use crate::remote::RemoteStore;
use crate::window::{WindowMode, WindowResolver};

#[derive(Debug, Clone)]
pub struct DirectOptions {
    /// Pre-allocate row ids client-side instead of letting the store pick.
    pub client_ids: bool,
    pub toast_duration: Duration,
    /// Row cap for [`WindowMode::Recent`].
    pub recent_limit: u32,
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self {
            client_ids: false,
            toast_duration: Duration::from_millis(1500),
            recent_limit: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitState {
    Composing,
    Submitting,
    Confirmed(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toast {
    Sent,
    Failed,
}

impl Toast {
    pub fn text(&self) -> &'static str {
        match self {
            Self::Sent => "Message sent",
            Self::Failed => "Failed to send",
        }
    }
}

pub struct DirectMessagePanel {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    profile: ProfileStore,
    resolver: WindowResolver,
    options: DirectOptions,
    device: DeviceInfo,

    /// Newest first. Every mutation holds the lock until it is persisted.
    tracked: Mutex<Vec<String>>,
    /// Ticket taken under the `tracked` lock by every resolve and by
    /// `clear_tracked`.
    window_generation: AtomicU64,
    /// Ticket of the last window published. Older answers are dropped.
    window_published: std::sync::Mutex<u64>,

    window_tx: watch::Sender<Vec<DirectMessage>>,
    state_tx: watch::Sender<SubmitState>,
    error_tx: watch::Sender<Option<SyncError>>,
    toast_tx: Arc<watch::Sender<Option<Toast>>>,
    toast_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DirectMessagePanel {
    /// Load the tracked ids and device identity from the cache.
    pub async fn open(
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        profile: ProfileStore,
        options: DirectOptions,
    ) -> Self {
        let loader = cache.clone();
        let (tracked, device) = match tokio::task::spawn_blocking(move || {
            (loader.load_tracked_ids(), device::collect(&loader))
        })
        .await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                (Vec::new(), device::collect(&cache))
            }
        };
        debug!("Tracking {} direct messages", tracked.len());

        Self {
            resolver: WindowResolver::new(remote.clone()),
            remote,
            cache,
            profile,
            options,
            device,
            tracked: Mutex::new(tracked),
            window_generation: AtomicU64::new(0),
            window_published: std::sync::Mutex::new(0),
            window_tx: watch::channel(Vec::new()).0,
            state_tx: watch::channel(SubmitState::Composing).0,
            error_tx: watch::channel(None).0,
            toast_tx: Arc::new(watch::channel(None).0),
            toast_timer: std::sync::Mutex::new(None),
        }
    }

    /// Send a message to the admins. Blank text is ignored (`Ok(None)`).
    /// On success the id is tracked and the window re-resolved; a failed
    /// re-resolve is reported on the error channel but the send still counts.
    pub async fn submit(&self, text: &str) -> Result<Option<String>, SyncError> {
        let body = text.trim();
        if body.is_empty() {
            return Ok(None);
        }

        self.state_tx.send_replace(SubmitState::Submitting);
        self.error_tx.send_replace(None);

        let payload = NewDirectMessage {
            id: self.options.client_ids.then(ids::large_id),
            deviceid: self.device.device_id.clone(),
            devicename: self.device.device_name.clone(),
            istablet: self.device.is_tablet,
            sysver: self.device.system_version.clone(),
            username: self.profile.get().display_name,
            usermsg: body.to_string(),
        };
        let fallback_id = payload.id.map(|id| id.to_string());

        let inserted = self
            .remote
            .insert_direct_message(payload)
            .await
            .map_err(|e| SyncError::remote_write(format!("{:#}", e)))
            .and_then(|receipt| {
                receipt
                    .key()
                    .or(fallback_id)
                    .ok_or_else(|| SyncError::remote_write("insert returned no id"))
            });

        let id = match inserted {
            Ok(id) => id,
            Err(err) => {
                warn!("Direct message insert failed: {}", err);
                self.state_tx.send_replace(SubmitState::Failed(err.to_string()));
                self.error_tx.send_replace(Some(err.clone()));
                self.show_toast(Toast::Failed);
                return Err(err);
            }
        };

        info!("Direct message {} confirmed", id);
        self.track(&id).await;
        self.state_tx.send_replace(SubmitState::Confirmed(id.clone()));
        self.show_toast(Toast::Sent);

        if let Err(e) = self.resolve_window(WindowMode::Tracked).await {
            debug!("Window refresh after submit failed: {}", e);
        }
        Ok(Some(id))
    }

    /// Re-fetch the visible rows. A failure clears the window and is
    /// published on the error channel. An answer overtaken by a later
    /// resolve is returned but not published.
    pub async fn resolve_window(&self, mode: WindowMode) -> Result<Vec<DirectMessage>, SyncError> {
        let (generation, tracked) = {
            let tracked = self.tracked.lock().await;
            (self.window_generation.fetch_add(1, Ordering::SeqCst) + 1, tracked.clone())
        };

        let result = self.resolver.resolve_mode(mode, &tracked).await;

        let mut published = self.published_generation();
        if *published > generation {
            debug!("Ignoring superseded window resolve {}", generation);
            return result;
        }
        *published = generation;

        match result {
            Ok(rows) => {
                self.window_tx.send_replace(rows.clone());
                if matches!(*self.error_tx.borrow(), Some(SyncError::RemoteRead(_))) {
                    self.error_tx.send_replace(None);
                }
                Ok(rows)
            }
            Err(err) => {
                self.window_tx.send_replace(Vec::new());
                self.error_tx.send_replace(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// The panel regained focus: pick up ids tracked elsewhere and refresh.
    pub async fn on_focus(&self, mode: WindowMode) -> Result<Vec<DirectMessage>, SyncError> {
        {
            let mut tracked = self.tracked.lock().await;
            let cache = self.cache.clone();
            match tokio::task::spawn_blocking(move || cache.load_tracked_ids()).await {
                Ok(ids) => *tracked = ids,
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }
        self.resolve_window(mode).await
    }

    /// Forget every tracked id, locally and in the cache.
    pub async fn clear_tracked(&self) -> Result<(), SyncError> {
        let mut tracked = self.tracked.lock().await;
        tracked.clear();
        {
            let mut published = self.published_generation();
            *published = self.window_generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.window_tx.send_replace(Vec::new());
        }

        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.clear_tracked_ids()).await {
            Ok(result) => result,
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                Err(SyncError::StorageWrite(e.to_string()))
            }
        }
    }

    /// Window mode for the admin view, using the configured row cap.
    pub fn recent_mode(&self) -> WindowMode {
        WindowMode::Recent {
            limit: self.options.recent_limit,
        }
    }

    pub async fn tracked_ids(&self) -> Vec<String> {
        self.tracked.lock().await.clone()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn window(&self) -> watch::Receiver<Vec<DirectMessage>> {
        self.window_tx.subscribe()
    }

    pub fn submit_state(&self) -> watch::Receiver<SubmitState> {
        self.state_tx.subscribe()
    }

    pub fn errors(&self) -> watch::Receiver<Option<SyncError>> {
        self.error_tx.subscribe()
    }

    pub fn toast(&self) -> watch::Receiver<Option<Toast>> {
        self.toast_tx.subscribe()
    }

    /// Prepend `id` (moving it to the front if already present) and persist.
    async fn track(&self, id: &str) {
        let mut tracked = self.tracked.lock().await;
        tracked.retain(|t| t != id);
        tracked.insert(0, id.to_string());

        let cache = self.cache.clone();
        let snapshot = tracked.clone();
        match tokio::task::spawn_blocking(move || cache.save_tracked_ids(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Tracked ids kept in memory only: {}", e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }

    fn published_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        match self.window_published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn show_toast(&self, toast: Toast) {
        self.toast_tx.send_replace(Some(toast));

        let toast_tx = self.toast_tx.clone();
        let hide_after = self.options.toast_duration;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(hide_after).await;
            toast_tx.send_replace(None);
        });

        let mut slot = match self.toast_timer.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.replace(timer) {
            previous.abort();
        }
    }
}

impl Drop for DirectMessagePanel {
    fn drop(&mut self) {
        let slot = match self.toast_timer.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = slot.take() {
            timer.abort();
        }
    }
}
