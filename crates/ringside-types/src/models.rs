use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AUTHOR: &str = "Unknown";
pub const DEFAULT_COLOR: &str = "#ffffff";
pub const DEFAULT_DISPLAY_NAME: &str = "You";

/// A group chat message as held in the canonical list and the local cache.
///
/// `id` is either a temporary local id (millisecond string) while the insert
/// is in flight, or the string form of the store-assigned id afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(alias = "user")]
    pub author: String,
    #[serde(alias = "content")]
    pub body: String,
    pub timestamp: String,
    #[serde(default = "default_color")]
    pub color: String,
}

impl Message {
    /// Milliseconds since the epoch, or `None` when the timestamp does not parse.
    pub fn timestamp_millis(&self) -> Option<i64> {
        parse_timestamp(&self.timestamp).map(|t| t.timestamp_millis())
    }
}

/// A direct (contact) message. Always re-derived from the store, never edited locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub author: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_reply_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "color")]
    pub color_tag: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            color_tag: DEFAULT_COLOR.to_string(),
        }
    }
}

/// Host metadata attached to every direct message insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub is_tablet: bool,
    pub system_version: String,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

/// Current time in the same shape a browser's `toISOString` produces.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS` form SQLite emits.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| ndt.and_utc())
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_accepts_remote_column_names() {
        let raw = r#"{"id":"7","user":"ana","content":"jab","timestamp":"2024-05-01T10:00:00.000Z"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.author, "ana");
        assert_eq!(msg.body, "jab");
        assert_eq!(msg.color, DEFAULT_COLOR);
    }

    #[test]
    fn timestamp_millis_handles_both_formats() {
        let iso = parse_timestamp("2024-05-01T10:00:00.250Z").unwrap();
        let sqlite = parse_timestamp("2024-05-01 10:00:00").unwrap();
        assert_eq!(iso.timestamp_millis() - sqlite.timestamp_millis(), 250);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn profile_uses_short_field_names() {
        let json = serde_json::to_string(&Profile::default()).unwrap();
        assert_eq!(json, r##"{"name":"You","color":"#ffffff"}"##);
    }
}
