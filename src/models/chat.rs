use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Model;

/// A 1:1 or group conversation. `participant_ids` is kept sorted so a pair
/// of users always maps to the same list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    pub tenant_id: String,
    pub is_group: bool,
    pub participant_ids: Vec<String>,
    pub title: Option<String>,
    pub created_by: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message_at: DateTime<Utc>,
}

impl Model for Chat {
    const COLLECTION: &'static str = "chats";
}

impl Chat {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub tenant_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Model for Message {
    const COLLECTION: &'static str = "messages";
}

/// Per-user read marker for a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub tenant_id: String,
    pub chat_id: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_read_at: DateTime<Utc>,
}

impl Model for MessageRead {
    const COLLECTION: &'static str = "message_reads";
}
