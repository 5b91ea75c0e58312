use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use ringside_types::models::Profile;

use crate::cache::LocalCache;
use crate::error::SyncError;

/// The current user's display name and color, shared by both message
/// streams. Cloning yields another handle onto the same profile.
#[derive(Clone)]
pub struct ProfileStore {
    cache: LocalCache,
    current: Arc<RwLock<Profile>>,
}

impl ProfileStore {
    /// Start from whatever the cache holds, or the defaults.
    pub fn load(cache: LocalCache) -> Self {
        let profile = cache.load_profile().unwrap_or_default();
        Self {
            cache,
            current: Arc::new(RwLock::new(profile)),
        }
    }

    pub fn get(&self) -> Profile {
        match self.current.read() {
            Ok(profile) => profile.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the cache, e.g. after another screen edited the profile.
    pub fn reload(&self) -> Profile {
        let Some(profile) = self.cache.load_profile() else {
            return self.get();
        };
        self.replace(profile.clone());
        profile
    }

    /// Change name and/or color. Empty values are ignored. The new profile
    /// takes effect even if it cannot be saved.
    pub fn update(&self, name: Option<&str>, color: Option<&str>) -> Result<Profile, SyncError> {
        let mut profile = self.get();
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            profile.display_name = name.to_string();
        }
        if let Some(color) = color.map(str::trim).filter(|c| !c.is_empty()) {
            profile.color_tag = color.to_string();
        }

        self.replace(profile.clone());
        debug!("Profile is now {} ({})", profile.display_name, profile.color_tag);
        self.cache.save_profile(&profile)?;
        Ok(profile)
    }

    fn replace(&self, profile: Profile) {
        match self.current.write() {
            Ok(mut current) => *current = profile,
            Err(poisoned) => {
                warn!("Profile lock poisoned, overwriting");
                *poisoned.into_inner() = profile;
            }
        }
    }
}
