//! Conversation store - conversation metadata, last message and unread counters

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::document::{from_document, to_document, DocumentStore, FieldPath, Filter, Patch};
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ConversationScope, LastMessage};
use crate::CONVERSATIONS;

/// Deterministic conversation id for a participant pair.
///
/// The pair is sorted so that `(a, b)` and `(b, a)` agree. Under
/// [`ConversationScope::PairAndProduct`] the product id is mixed in, and a
/// missing product still yields a key distinct from the pair-only one.
pub fn conversation_key(
    a: &str,
    b: &str,
    scope: ConversationScope,
    product_id: Option<&str>,
) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let mut hasher = Sha256::new();
    for part in [first, second] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    if scope == ConversationScope::PairAndProduct {
        hasher.update(b"product");
        match product_id {
            Some(product_id) => {
                hasher.update([1u8]);
                hasher.update(product_id.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    format!("conv_{}", hex::encode(&hasher.finalize()[..16]))
}

/// Oldest conversation among `candidates` whose participants are exactly
/// `{a, b}`, narrowed to `product_id` under [`ConversationScope::PairAndProduct`]
pub fn pick_for_pair<'c>(
    candidates: impl IntoIterator<Item = &'c Conversation>,
    a: &str,
    b: &str,
    scope: ConversationScope,
    product_id: Option<&str>,
) -> Option<&'c Conversation> {
    candidates
        .into_iter()
        .filter(|c| c.has_participants(a, b))
        .filter(|c| match scope {
            ConversationScope::Pair => true,
            ConversationScope::PairAndProduct => c.product_id.as_deref() == product_id,
        })
        .min_by_key(|c| c.created_at)
}

/// Conversation store
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<dyn DocumentStore>,
}

impl ConversationStore {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self { db }
    }

    /// Create or replace a conversation
    pub async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        let document = to_document(conversation)?;

        if self.create_if_absent(conversation).await? {
            return Ok(());
        }

        // Replace field by field; fields absent from the new record are cleared.
        let existing = self
            .db
            .get(CONVERSATIONS, &conversation.id)
            .await?
            .ok_or_else(|| StoreError::not_found(CONVERSATIONS, &conversation.id))?;

        let mut patches: Vec<Patch> = document
            .iter()
            .filter(|(field, _)| field.as_str() != "id")
            .map(|(field, value)| Patch::Set(FieldPath::new(field.clone()), value.clone()))
            .collect();
        patches.extend(
            existing
                .keys()
                .filter(|field| field.as_str() != "id" && !document.contains_key(*field))
                .map(|field| Patch::Remove(FieldPath::new(field.clone()))),
        );

        self.db.update(CONVERSATIONS, &conversation.id, patches).await?;

        debug!("Replaced conversation {}", conversation.id);
        Ok(())
    }

    /// Insert the conversation unless its id is already taken
    pub async fn create_if_absent(&self, conversation: &Conversation) -> Result<bool> {
        let created = self
            .db
            .insert_if_absent(CONVERSATIONS, &conversation.id, to_document(conversation)?)
            .await?;

        if created {
            info!(
                "Created conversation {} between {:?}",
                conversation.id, conversation.participants
            );
        }
        Ok(created)
    }

    /// Get a single conversation by ID
    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.db
            .get(CONVERSATIONS, id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Conversation whose participants are exactly `{a, b}`.
    ///
    /// Under [`ConversationScope::PairAndProduct`] the product id must match
    /// too. Should several records qualify (data written before the keyed
    /// create existed), the oldest one wins.
    pub async fn find_by_participant_pair(
        &self,
        a: &str,
        b: &str,
        scope: ConversationScope,
        product_id: Option<&str>,
    ) -> Result<Option<Conversation>> {
        let candidates = self.load(&Filter::array_contains("participants", a)).await?;

        Ok(pick_for_pair(&candidates, a, b, scope, product_id).cloned())
    }

    /// Every stored conversation, in insertion order
    pub async fn list_all(&self) -> Result<Vec<Conversation>> {
        self.load(&Filter::All).await
    }

    /// Conversations of a user, most recently updated first
    pub async fn list_by_participant(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations = self
            .load(&Filter::array_contains("participants", user_id))
            .await?;

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Record a new message: refresh the snapshot and bump the receiver's counter
    pub async fn record_message(
        &self,
        id: &str,
        receiver_id: &str,
        snapshot: &LastMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let patches = vec![
            Patch::Set("lastMessage".into(), serde_json::to_value(snapshot)?),
            Patch::Increment(FieldPath::new("unreadCount").child(receiver_id), 1),
            Patch::Set("updatedAt".into(), serde_json::to_value(now)?),
        ];

        self.db.update(CONVERSATIONS, id, patches).await?;

        debug!("Recorded message in conversation {} for {}", id, receiver_id);
        Ok(())
    }

    /// Reset a participant's unread counter
    pub async fn reset_unread(&self, id: &str, user_id: &str) -> Result<()> {
        self.db
            .update(
                CONVERSATIONS,
                id,
                vec![Patch::Set(
                    FieldPath::new("unreadCount").child(user_id),
                    Value::from(0),
                )],
            )
            .await
    }

    async fn load(&self, filter: &Filter) -> Result<Vec<Conversation>> {
        self.db
            .query(CONVERSATIONS, filter)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_ignores_order() {
        use ConversationScope::{Pair, PairAndProduct};

        assert_eq!(
            conversation_key("alice", "bob", Pair, None),
            conversation_key("bob", "alice", Pair, None)
        );
        assert_eq!(
            conversation_key("alice", "bob", Pair, None),
            conversation_key("alice", "bob", Pair, Some("p1"))
        );
        assert_ne!(
            conversation_key("alice", "bob", PairAndProduct, Some("p1")),
            conversation_key("alice", "bob", PairAndProduct, Some("p2"))
        );
        assert_ne!(
            conversation_key("ab", "c", Pair, None),
            conversation_key("a", "bc", Pair, None)
        );
        assert!(conversation_key("alice", "bob", Pair, None).starts_with("conv_"));
    }

    #[test]
    fn test_product_scope_without_product_has_its_own_key() {
        let pair = conversation_key("alice", "bob", ConversationScope::Pair, None);
        let scoped = conversation_key("alice", "bob", ConversationScope::PairAndProduct, None);
        let empty = conversation_key("alice", "bob", ConversationScope::PairAndProduct, Some(""));

        assert_ne!(pair, scoped);
        assert_ne!(scoped, empty);
    }
}
