//! PostgREST URL and filter helpers.

use anyhow::{Result, anyhow};
use url::Url;

use ringside_types::api::IdKey;

/// `{base}/rest/v1/{table}`
pub fn table_url(base: &Url, table: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(["rest", "v1", table]);
    Ok(url)
}

/// `in.(1,2,"9007199254740995")`: numbers bare, text double-quoted.
pub fn in_filter(keys: &[IdKey]) -> String {
    let items: Vec<String> = keys
        .iter()
        .map(|key| match key {
            IdKey::Numeric(n) => n.to_string(),
            IdKey::Text(s) => quote(s),
        })
        .collect();
    format!("in.({})", items.join(","))
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
