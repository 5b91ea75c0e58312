//! The hosted backend: PostgREST for reads and writes, Realtime for the
//! insert feed.

pub mod realtime;
pub mod rest;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use ringside_sync::remote::{FeedSubscription, RemoteStore};
use ringside_types::api::{
    DirectMessageReceipt, DirectMessageRecord, IdKey, MessageRecord, NewDirectMessage, NewMessage,
};
use ringside_types::events::{DIRECT_MESSAGES_TABLE, MESSAGES_TABLE};

pub struct SupabaseStore {
    client: Client,
    base: Url,
    anon_key: String,
}

impl SupabaseStore {
    pub fn new(project_url: &str, anon_key: &str) -> Result<Self> {
        let base = Url::parse(project_url).with_context(|| format!("invalid SUPABASE_URL {}", project_url))?;
        if anon_key.is_empty() {
            return Err(anyhow!("SUPABASE_ANON_KEY is empty"));
        }
        info!("Using Supabase project at {}", base);
        Ok(Self {
            client: Client::new(),
            base,
            anon_key: anon_key.to_string(),
        })
    }

    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder> {
        let url = rest::table_url(&self.base, table)?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key))
    }

    async fn rows<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<Vec<T>> {
        let response = send(what, request).await?;
        response.json().await.with_context(|| format!("{}: unreadable response", what))
    }
}

async fn send(what: &str, request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.with_context(|| format!("{}: request failed", what))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("{}: {} {}", what, status, body));
    }
    Ok(response)
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn fetch_messages(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        let request = self.request(Method::GET, MESSAGES_TABLE)?.query(&[
            ("select", "*".to_string()),
            ("order", "timestamp.asc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let rows: Vec<MessageRecord> = self.rows("fetch messages", request).await?;
        debug!("Fetched {} messages", rows.len());
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<MessageRecord>> {
        let request = self
            .request(Method::POST, MESSAGES_TABLE)?
            .header("Prefer", "return=representation")
            .query(&[("select", "*")])
            .json(&[message]);
        let rows: Vec<MessageRecord> = self.rows("insert message", request).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_all_messages(&self) -> Result<()> {
        let request = self
            .request(Method::DELETE, MESSAGES_TABLE)?
            .query(&[("id", "not.is.null")]);
        send("delete messages", request).await?;
        info!("Deleted all messages");
        Ok(())
    }

    async fn subscribe_message_inserts(&self) -> Result<FeedSubscription> {
        let url = realtime::realtime_url(&self.base, &self.anon_key)?;
        realtime::subscribe_inserts(&url, &self.anon_key).await
    }

    async fn fetch_direct_messages(&self, ids: &[IdKey]) -> Result<Vec<DirectMessageRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .request(Method::GET, DIRECT_MESSAGES_TABLE)?
            .query(&[("select", "*".to_string()), ("id", rest::in_filter(ids))]);
        self.rows("fetch direct messages", request).await
    }

    async fn fetch_recent_direct_messages(&self, limit: u32) -> Result<Vec<DirectMessageRecord>> {
        let request = self.request(Method::GET, DIRECT_MESSAGES_TABLE)?.query(&[
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.rows("fetch recent direct messages", request).await
    }

    async fn insert_direct_message(&self, message: NewDirectMessage) -> Result<DirectMessageReceipt> {
        let request = self
            .request(Method::POST, DIRECT_MESSAGES_TABLE)?
            .header("Prefer", "return=representation")
            .query(&[("select", "id,created_at")])
            .json(&[message]);
        let rows: Vec<DirectMessageReceipt> = self.rows("insert direct message", request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("insert direct message: no row returned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_configuration() {
        assert!(SupabaseStore::new("not a url", "key").is_err());
        assert!(SupabaseStore::new("https://abc.supabase.co", "").is_err());
        assert!(SupabaseStore::new("https://abc.supabase.co", "key").is_ok());
    }

    #[test]
    fn requests_carry_both_auth_headers() {
        let store = SupabaseStore::new("https://abc.supabase.co", "anon").unwrap();
        let request = store
            .request(Method::GET, MESSAGES_TABLE)
            .unwrap()
            .query(&[("limit", "5")])
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "https://abc.supabase.co/rest/v1/messages?limit=5");
        assert_eq!(request.headers()["apikey"], "anon");
        assert_eq!(request.headers()["authorization"], "Bearer anon");
    }
}
