//! Local cache: the message list, tracked direct-message ids, profile and
//! device id, serialized as JSON under fixed keys.
//!
//! Loads never fail: a missing key or unreadable blob reads as empty. Saves
//! report failure but callers keep their in-memory state regardless.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use ringside_types::models::{Message, Profile};

use crate::error::SyncError;
use crate::kv::KeyValueStore;

pub const MESSAGES_KEY: &str = "messages_v1";
pub const PROFILE_KEY: &str = "profile_v1";
pub const TRACKED_IDS_KEY: &str = "tracked_ids_v1";
pub const DEVICE_ID_KEY: &str = "device_id_v1";

#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
}

/// Profile blob as written by any version of the app; fields may be missing.
#[derive(Debug, Deserialize)]
struct StoredProfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load_messages(&self) -> Vec<Message> {
        self.load_json(MESSAGES_KEY).unwrap_or_default()
    }

    pub fn save_messages(&self, messages: &[Message]) -> Result<(), SyncError> {
        self.save_json(MESSAGES_KEY, &messages)
    }

    pub fn load_tracked_ids(&self) -> Vec<String> {
        self.load_json(TRACKED_IDS_KEY).unwrap_or_default()
    }

    pub fn save_tracked_ids(&self, ids: &[String]) -> Result<(), SyncError> {
        self.save_json(TRACKED_IDS_KEY, &ids)
    }

    pub fn clear_tracked_ids(&self) -> Result<(), SyncError> {
        self.store.remove(TRACKED_IDS_KEY).map_err(|e| {
            warn!("Failed to clear tracked ids: {}", e);
            SyncError::StorageWrite(e.to_string())
        })
    }

    /// The saved profile, with empty or missing fields taken from the defaults.
    pub fn load_profile(&self) -> Option<Profile> {
        let stored: StoredProfile = self.load_json(PROFILE_KEY)?;
        let mut profile = Profile::default();
        if let Some(name) = stored.name.filter(|n| !n.is_empty()) {
            profile.display_name = name;
        }
        if let Some(color) = stored.color.filter(|c| !c.is_empty()) {
            profile.color_tag = color;
        }
        Some(profile)
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<(), SyncError> {
        self.save_json(PROFILE_KEY, profile)
    }

    /// Stable per-install id, generated on first use.
    pub fn load_or_create_device_id(&self) -> String {
        if let Some(id) = self.load_json::<String>(DEVICE_ID_KEY).filter(|id| !id.is_empty()) {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        // Best-effort: a fresh id next launch is acceptable.
        let _ = self.save_json(DEVICE_ID_KEY, &id);
        id
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("{}", SyncError::StorageRead(format!("{}: {}", key, e)));
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{}", SyncError::StorageRead(format!("{} is malformed: {}", key, e)));
                None
            }
        }
    }

    fn save_json<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SyncError> {
        let result = serde_json::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(key, &raw));

        result.map_err(|e| {
            warn!("Failed to save {}: {}", key, e);
            SyncError::StorageWrite(format!("{}: {}", key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use anyhow::anyhow;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("disk unavailable"))
        }
        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }
        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    fn cache() -> (Arc<MemoryStore>, LocalCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = LocalCache::new(store.clone());
        (store, cache)
    }

    fn message(id: &str, body: &str) -> Message {
        Message {
            id: id.to_string(),
            author: "ana".to_string(),
            body: body.to_string(),
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            color: "#ff0000".to_string(),
        }
    }

    #[test]
    fn missing_keys_load_as_empty() {
        let (_, cache) = cache();
        assert!(cache.load_messages().is_empty());
        assert!(cache.load_tracked_ids().is_empty());
        assert!(cache.load_profile().is_none());
    }

    #[test]
    fn messages_survive_a_save_and_load() {
        let (_, cache) = cache();
        let list = vec![message("1", "jab"), message("2", "cross")];
        cache.save_messages(&list).unwrap();
        assert_eq!(cache.load_messages(), list);
    }

    #[test]
    fn malformed_json_is_treated_as_absent() {
        let (store, cache) = cache();
        store.set(MESSAGES_KEY, "[{\"id\": 1,").unwrap();
        store.set(TRACKED_IDS_KEY, "{\"not\":\"a list\"}").unwrap();
        store.set(PROFILE_KEY, "nope").unwrap();

        assert!(cache.load_messages().is_empty());
        assert!(cache.load_tracked_ids().is_empty());
        assert!(cache.load_profile().is_none());
    }

    #[test]
    fn profile_fills_missing_fields_from_defaults() {
        let (store, cache) = cache();
        store.set(PROFILE_KEY, r#"{"name":"Ana","color":""}"#).unwrap();
        let profile = cache.load_profile().unwrap();
        assert_eq!(profile.display_name, "Ana");
        assert_eq!(profile.color_tag, "#ffffff");
    }

    #[test]
    fn tracked_ids_can_be_cleared() {
        let (_, cache) = cache();
        cache.save_tracked_ids(&["3".to_string(), "1".to_string()]).unwrap();
        assert_eq!(cache.load_tracked_ids(), vec!["3", "1"]);
        cache.clear_tracked_ids().unwrap();
        assert!(cache.load_tracked_ids().is_empty());
    }

    #[test]
    fn device_id_is_stable() {
        let (_, cache) = cache();
        let first = cache.load_or_create_device_id();
        assert_eq!(cache.load_or_create_device_id(), first);
    }

    #[test]
    fn broken_storage_degrades_without_panicking() {
        let cache = LocalCache::new(Arc::new(BrokenStore));
        assert!(cache.load_messages().is_empty());
        assert!(matches!(
            cache.save_messages(&[message("1", "jab")]),
            Err(SyncError::StorageWrite(_))
        ));
        assert!(!cache.load_or_create_device_id().is_empty());
    }
}
