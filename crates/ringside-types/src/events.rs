use serde::{Deserialize, Serialize};

use crate::api::{DirectMessageRecord, MessageRecord};

pub const MESSAGES_TABLE: &str = "messages";
pub const DIRECT_MESSAGES_TABLE: &str = "directmessages";

/// Row change notifications pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// A row was inserted into `messages`
    MessageInsert { record: MessageRecord },

    /// A row was inserted into `directmessages`
    DirectMessageInsert { record: DirectMessageRecord },

    /// Every row of `messages` was deleted
    MessagesCleared { deleted: usize },
}

impl FeedEvent {
    /// The table this event is scoped to. Subscribers only receive events
    /// for the tables they asked for.
    pub fn table(&self) -> &'static str {
        match self {
            Self::MessageInsert { .. } | Self::MessagesCleared { .. } => MESSAGES_TABLE,
            Self::DirectMessageInsert { .. } => DIRECT_MESSAGES_TABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_scoped_to_their_table() {
        let cleared = FeedEvent::MessagesCleared { deleted: 3 };
        assert_eq!(cleared.table(), MESSAGES_TABLE);

        let dm = FeedEvent::DirectMessageInsert {
            record: DirectMessageRecord::default(),
        };
        assert_eq!(dm.table(), DIRECT_MESSAGES_TABLE);
    }

    #[test]
    fn events_serialize_with_type_and_data() {
        let json = serde_json::to_value(FeedEvent::MessagesCleared { deleted: 2 }).unwrap();
        assert_eq!(json["type"], "MessagesCleared");
        assert_eq!(json["data"]["deleted"], 2);
    }
}
