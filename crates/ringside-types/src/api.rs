use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{DEFAULT_AUTHOR, DEFAULT_COLOR, DirectMessage, Message, now_timestamp};

// -- Messages --

/// A `messages` row as the store hands it back. Every column is optional
/// because rows arrive from REST responses and push payloads alike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl MessageRecord {
    pub fn canonical_id(&self) -> Option<String> {
        self.id.as_ref().and_then(id_to_string)
    }

    /// Normalize into a [`Message`], filling absent columns with their
    /// fallbacks. Rows without a usable id are rejected.
    pub fn into_message(self) -> Option<Message> {
        let Some(id) = self.canonical_id() else {
            warn!("Dropping message row without an id: {:?}", self);
            return None;
        };

        Some(Message {
            id,
            author: non_empty(self.user).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            body: self.content.unwrap_or_default(),
            timestamp: non_empty(self.timestamp).unwrap_or_else(now_timestamp),
            color: non_empty(self.color).unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        })
    }
}

/// Insert payload for the `messages` table. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub user: String,
    pub content: String,
    pub timestamp: String,
    pub color: String,
}

impl From<&Message> for NewMessage {
    fn from(msg: &Message) -> Self {
        Self {
            user: msg.author.clone(),
            content: msg.body.clone(),
            timestamp: msg.timestamp.clone(),
            color: msg.color.clone(),
        }
    }
}

// -- Direct messages --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectMessageRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub usermsg: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub adminmsg: Option<String>,
    #[serde(default)]
    pub admintime: Option<String>,
    #[serde(default)]
    pub devicename: Option<String>,
    #[serde(default)]
    pub deviceid: Option<String>,
    #[serde(default)]
    pub sysver: Option<String>,
    #[serde(default)]
    pub istablet: Option<bool>,
}

impl DirectMessageRecord {
    pub fn key(&self) -> Option<String> {
        self.id.as_ref().and_then(id_to_string)
    }

    pub fn into_direct_message(self) -> Option<DirectMessage> {
        let Some(id) = self.key() else {
            warn!("Dropping direct message row without an id");
            return None;
        };

        Some(DirectMessage {
            id,
            author: non_empty(self.username).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            body: self.usermsg.unwrap_or_default(),
            created_at: self.created_at,
            admin_reply: self.adminmsg,
            admin_reply_at: self.admintime,
            device_name: self.devicename,
        })
    }
}

/// Insert payload for the `directmessages` table. `id` is only present when
/// the client pre-allocates it; otherwise the store generates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDirectMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub deviceid: String,
    pub devicename: String,
    pub istablet: bool,
    pub sysver: String,
    pub username: String,
    pub usermsg: String,
}

/// What a direct message insert returns: the store id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessageReceipt {
    pub id: Value,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

impl DirectMessageReceipt {
    pub fn key(&self) -> Option<String> {
        id_to_string(&self.id)
    }
}

/// One element of a bulk "id in (...)" filter. Ids that survive a lossless
/// round trip through a double are sent as numbers; anything else stays text
/// so the store never sees a rounded value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdKey {
    Numeric(i64),
    Text(String),
}

impl IdKey {
    pub fn as_text(&self) -> String {
        match self {
            Self::Numeric(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Render a JSON id column (string or number) the way it is keyed locally.
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_normalizes_with_fallbacks() {
        let record: MessageRecord = serde_json::from_value(json!({ "id": 42 })).unwrap();
        let msg = record.into_message().unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.author, DEFAULT_AUTHOR);
        assert_eq!(msg.body, "");
        assert_eq!(msg.color, DEFAULT_COLOR);
        assert!(msg.timestamp_millis().is_some());
    }

    #[test]
    fn record_without_id_is_rejected() {
        let record = MessageRecord {
            user: Some("ana".into()),
            ..Default::default()
        };
        assert!(record.into_message().is_none());
    }

    #[test]
    fn direct_record_accepts_camel_case_created_at() {
        let record: DirectMessageRecord = serde_json::from_value(json!({
            "id": "9007199254740995",
            "username": "ana",
            "usermsg": "need gloves",
            "createdAt": "2024-05-01T10:00:00Z",
            "adminmsg": "on the way",
        }))
        .unwrap();
        let dm = record.into_direct_message().unwrap();
        assert_eq!(dm.id, "9007199254740995");
        assert_eq!(dm.created_at.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(dm.admin_reply.as_deref(), Some("on the way"));
    }

    #[test]
    fn id_keys_serialize_untagged() {
        let keys = vec![IdKey::Numeric(3), IdKey::Text("9007199254740995".into())];
        assert_eq!(serde_json::to_string(&keys).unwrap(), r#"[3,"9007199254740995"]"#);
    }

    #[test]
    fn new_direct_message_omits_missing_id() {
        let payload = NewDirectMessage {
            id: None,
            deviceid: "d".into(),
            devicename: "linux".into(),
            istablet: false,
            sysver: "6.1".into(),
            username: "ana".into(),
            usermsg: "hi".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("id").is_none());
    }
}
