//! Supabase Realtime over its Phoenix channel protocol: join one
//! `postgres_changes` channel for inserts on `messages`, keep it alive with
//! heartbeats, and forward each inserted record.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use ringside_sync::remote::{FEED_BUFFER, FeedSubscription};
use ringside_types::api::MessageRecord;
use ringside_types::events::MESSAGES_TABLE;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_REF: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// `wss://{host}/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn realtime_url(base: &Url, anon_key: &str) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("unsupported scheme {}", other),
    };
    url.set_scheme(scheme).map_err(|_| anyhow!("cannot switch {} to {}", base, scheme))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(["realtime", "v1", "websocket"]);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub fn channel_topic(table: &str) -> String {
    format!("realtime:public:{}", table)
}

pub fn join_frame(table: &str, anon_key: &str) -> PhoenixFrame {
    PhoenixFrame {
        topic: channel_topic(table),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": table }
                ]
            },
            "access_token": anon_key,
        }),
        reference: Some(JOIN_REF.into()),
    }
}

pub fn heartbeat_frame(reference: u64) -> PhoenixFrame {
    PhoenixFrame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// The inserted row carried by a change frame, if this is one.
pub fn inserted_record(frame: &PhoenixFrame) -> Option<MessageRecord> {
    let record = match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            if data.get("type").and_then(Value::as_str).is_some_and(|t| t != "INSERT") {
                return None;
            }
            data.get("record")?
        }
        // Older servers send the change under its own event name.
        "INSERT" => frame.payload.get("record")?,
        _ => return None,
    };
    match serde_json::from_value(record.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Unreadable realtime record: {}", e);
            None
        }
    }
}

/// Outcome of our join, if `frame` is the server's reply to it.
fn join_reply(frame: &PhoenixFrame) -> Option<Result<()>> {
    if frame.event != "phx_reply" || frame.reference.as_deref() != Some(JOIN_REF) {
        return None;
    }
    match frame.payload.get("status").and_then(Value::as_str) {
        Some("ok") => Some(Ok(())),
        status => Some(Err(anyhow!(
            "join rejected ({}): {}",
            status.unwrap_or("no status"),
            frame.payload.get("response").cloned().unwrap_or_default()
        ))),
    }
}

fn encode(frame: &PhoenixFrame) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(frame)?))
}

/// Connect, join, and hand back a feed of inserted message rows. Fails if
/// the socket cannot be opened or the join is refused.
pub async fn subscribe_inserts(url: &Url, anon_key: &str) -> Result<FeedSubscription> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| anyhow!("realtime connect failed: {}", e))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let topic = channel_topic(MESSAGES_TABLE);
    ws_tx.send(encode(&join_frame(MESSAGES_TABLE, anon_key))?).await?;

    tokio::time::timeout(JOIN_TIMEOUT, async {
        while let Some(msg) = ws_rx.next().await {
            let Message::Text(text) = msg? else { continue };
            let Ok(frame) = serde_json::from_str::<PhoenixFrame>(&text) else {
                continue;
            };
            if let Some(outcome) = join_reply(&frame) {
                return outcome;
            }
        }
        Err(anyhow!("socket closed before the join was acknowledged"))
    })
    .await
    .map_err(|_| anyhow!("timed out joining {}", topic))??;
    info!("Joined realtime channel {}", topic);

    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let frame = match encode(&heartbeat_frame(next_ref)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Failed to encode heartbeat: {}", e);
                            break;
                        }
                    };
                    next_ref += 1;
                    if ws_tx.send(frame).await.is_err() {
                        warn!("Realtime heartbeat failed, dropping feed");
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Realtime socket closed");
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("Realtime socket error: {}", e);
                            break;
                        }
                    };

                    let frame: PhoenixFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("Ignoring unparsable realtime frame: {}", e);
                            continue;
                        }
                    };
                    if frame.event == "phx_error" || frame.event == "phx_close" {
                        warn!("Realtime channel {} ended with {}", frame.topic, frame.event);
                        break;
                    }
                    if let Some(record) = inserted_record(&frame) {
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        let _ = ws_tx.close().await;
    });

    Ok(FeedSubscription::new(rx, task))
}
