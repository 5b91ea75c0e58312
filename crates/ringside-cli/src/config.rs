use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Local SQLite store; sessions in this process share its live feed.
    Embedded,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub cache_path: PathBuf,
    pub store_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    /// Unlocks clearing the chat, the all-users inbox and admin replies.
    pub dev_mode: bool,
    pub history_limit: u32,
    pub client_ids: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match var("RINGSIDE_BACKEND").as_deref().unwrap_or("embedded") {
            "embedded" => Backend::Embedded,
            "supabase" => Backend::Supabase,
            other => bail!("RINGSIDE_BACKEND must be 'embedded' or 'supabase', got '{}'", other),
        };

        let supabase_url = var("SUPABASE_URL").filter(|v| !v.is_empty());
        let supabase_anon_key = var("SUPABASE_ANON_KEY").filter(|v| !v.is_empty());
        if backend == Backend::Supabase && (supabase_url.is_none() || supabase_anon_key.is_none()) {
            bail!("SUPABASE_URL and SUPABASE_ANON_KEY are required for the supabase backend");
        }

        let history_limit = match var("RINGSIDE_HISTORY_LIMIT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow!("RINGSIDE_HISTORY_LIMIT must be a number, got '{}'", raw))?,
            None => 500,
        };

        Ok(Self {
            backend,
            cache_path: var("RINGSIDE_CACHE_PATH")
                .unwrap_or_else(|| "ringside-cache.db".into())
                .into(),
            store_path: var("RINGSIDE_STORE_PATH").unwrap_or_else(|| "ringside.db".into()).into(),
            supabase_url,
            supabase_anon_key,
            dev_mode: flag(var("RINGSIDE_DEV_MODE")),
            history_limit,
            client_ids: flag(var("RINGSIDE_CLIENT_IDS")),
        })
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(value.as_deref(), Some("1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_the_embedded_backend() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, Backend::Embedded);
        assert_eq!(config.cache_path, PathBuf::from("ringside-cache.db"));
        assert_eq!(config.history_limit, 500);
        assert!(!config.dev_mode);
        assert!(!config.client_ids);
    }

    #[test]
    fn supabase_requires_credentials() {
        assert!(Config::from_lookup(lookup(&[("RINGSIDE_BACKEND", "supabase")])).is_err());

        let config = Config::from_lookup(lookup(&[
            ("RINGSIDE_BACKEND", "supabase"),
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("RINGSIDE_DEV_MODE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.backend, Backend::Supabase);
        assert!(config.dev_mode);
    }

    #[test]
    fn rejects_unknown_backends_and_bad_limits() {
        assert!(Config::from_lookup(lookup(&[("RINGSIDE_BACKEND", "firebase")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RINGSIDE_HISTORY_LIMIT", "lots")])).is_err());
    }
}
