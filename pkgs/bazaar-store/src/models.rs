//! Message and conversation records as persisted by both backends
//!
//! Field names are camelCase so that documents written by one backend read
//! back through the other, and so that blobs left behind by the browser mock
//! still load. The mock never linked messages to conversations (it matched
//! threads by participant pair), so its messages carry an empty or placeholder
//! `conversationId` until the messaging layer relinks them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single message between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_photo: Option<String>,
    pub receiver_id: String,
    pub receiver_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    /// Unresolved until the conversation is found or created.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

/// Denormalized copy of the latest message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            timestamp: message.timestamp,
            sender_id: message.sender_id.clone(),
        }
    }
}

/// Conversation between exactly two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_names: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participant_photos: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

impl Conversation {
    /// True when the participant set is exactly `{a, b}`
    pub fn has_participants(&self, a: &str, b: &str) -> bool {
        self.participants.len() == 2
            && self.participants.iter().any(|p| p == a)
            && self.participants.iter().any(|p| p == b)
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    /// Display name of the participant that is not `user_id`
    pub fn other_participant_name(&self, user_id: &str) -> Option<&str> {
        self.other_participant(user_id)
            .and_then(|other| self.participant_names.get(other))
            .map(String::as_str)
    }

    /// Unread messages for `user_id`; a missing entry counts as zero
    pub fn unread_for(&self, user_id: &str) -> u64 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }

    pub fn has_unread(&self, user_id: &str) -> bool {
        self.unread_for(user_id) > 0
    }
}

/// How conversation identity is derived from a send request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationScope {
    /// One conversation per participant pair
    #[default]
    Pair,
    /// One conversation per participant pair and product
    PairAndProduct,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "conv-1".to_string(),
            participants: vec!["alice".to_string(), "bob".to_string()],
            participant_names: BTreeMap::from([
                ("alice".to_string(), "Alice".to_string()),
                ("bob".to_string(), "Bob".to_string()),
            ]),
            participant_photos: BTreeMap::new(),
            last_message: None,
            unread_count: BTreeMap::from([("bob".to_string(), 3)]),
            created_at: now,
            updated_at: now,
            product_id: None,
            product_name: None,
        }
    }

    #[test]
    fn test_participant_helpers() {
        let conv = conversation();

        assert!(conv.has_participants("bob", "alice"));
        assert!(!conv.has_participants("alice", "carol"));
        assert_eq!(conv.other_participant("alice"), Some("bob"));
        assert_eq!(conv.other_participant_name("bob"), Some("Alice"));
        assert_eq!(conv.unread_for("bob"), 3);
        assert_eq!(conv.unread_for("alice"), 0);
        assert!(!conv.has_unread("alice"));
    }

    #[test]
    fn test_message_reads_legacy_blob() {
        // Shape written by the browser mock: empty conversation id, no product.
        let json = r#"{
            "id": "msg-1700000000000",
            "senderId": "alice",
            "senderName": "Alice",
            "receiverId": "bob",
            "receiverName": "Bob",
            "content": "hi",
            "timestamp": "2024-11-14T22:13:20.000Z",
            "read": false,
            "conversationId": ""
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.conversation_id, None);
        assert_eq!(message.product_id, None);
        assert!(!message.read);
    }

    #[test]
    fn test_conversation_serializes_camel_case() {
        let json = serde_json::to_value(conversation()).unwrap();

        assert!(json.get("participantNames").is_some());
        assert_eq!(json["unreadCount"]["bob"], 3);
        assert!(json.get("productId").is_none());
    }
}
