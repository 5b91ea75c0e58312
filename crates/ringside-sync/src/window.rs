//! Resolving the tracked direct-message ids into rows, in tracked order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use ringside_types::api::{DirectMessageRecord, IdKey};
use ringside_types::models::DirectMessage;

use crate::error::SyncError;
use crate::remote::RemoteStore;

/// Largest integer a double holds exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Which rows the panel shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// The rows this client created, newest tracked first.
    Tracked,
    /// Everyone's newest rows by creation time. Admin view.
    Recent { limit: u32 },
}

/// Key for one tracked id. Numeric only when the number is exactly
/// representable and renders back to the same text.
pub fn to_query_key(id: &str) -> IdKey {
    match id.parse::<i64>() {
        Ok(n) if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) && n.to_string() == id => {
            IdKey::Numeric(n)
        }
        Ok(_) => {
            warn!("Id {} is outside the safe integer range; querying as text", id);
            IdKey::Text(id.to_string())
        }
        Err(_) => {
            debug!("Id {} is not an integer; querying as text", id);
            IdKey::Text(id.to_string())
        }
    }
}

pub fn to_query_keys(ids: &[String]) -> Vec<IdKey> {
    ids.iter().map(|id| to_query_key(id)).collect()
}

/// Arrange `rows` in the order of `tracked`. Ids without a row are skipped,
/// as are rows nobody tracked.
pub fn order_by_tracked(tracked: &[String], rows: Vec<DirectMessage>) -> Vec<DirectMessage> {
    let mut by_id: HashMap<String, DirectMessage> = rows.into_iter().map(|row| (row.id.clone(), row)).collect();
    tracked.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[derive(Clone)]
pub struct WindowResolver {
    remote: Arc<dyn RemoteStore>,
}

impl WindowResolver {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Fetch the tracked rows in one query and order them like `tracked`.
    pub async fn resolve(&self, tracked: &[String]) -> Result<Vec<DirectMessage>, SyncError> {
        if tracked.is_empty() {
            return Ok(Vec::new());
        }

        let keys = to_query_keys(tracked);
        let records = self.remote.fetch_direct_messages(&keys).await.map_err(|e| {
            warn!("Direct message lookup failed: {:#}", e);
            SyncError::remote_read(format!("{:#}", e))
        })?;

        let rows = normalize(records);
        if rows.len() < tracked.len() {
            debug!("{} of {} tracked direct messages found", rows.len(), tracked.len());
        }
        Ok(order_by_tracked(tracked, rows))
    }

    /// Newest rows across all clients.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DirectMessage>, SyncError> {
        let records = self.remote.fetch_recent_direct_messages(limit).await.map_err(|e| {
            warn!("Recent direct message fetch failed: {:#}", e);
            SyncError::remote_read(format!("{:#}", e))
        })?;
        Ok(normalize(records))
    }

    pub async fn resolve_mode(&self, mode: WindowMode, tracked: &[String]) -> Result<Vec<DirectMessage>, SyncError> {
        match mode {
            WindowMode::Tracked => self.resolve(tracked).await,
            WindowMode::Recent { limit } => self.recent(limit).await,
        }
    }
}

fn normalize(records: Vec<DirectMessageRecord>) -> Vec<DirectMessage> {
    records.into_iter().filter_map(DirectMessageRecord::into_direct_message).collect()
}
