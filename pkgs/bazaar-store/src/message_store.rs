//! Message store - append-only message records

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::document::{from_document, to_document, DocumentStore, Filter, Patch, Write};
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::MESSAGES;

/// Message store over any document backend
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<dyn DocumentStore>,
}

impl MessageStore {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self { db }
    }

    /// Persist a new message; a blank id is replaced by a generated one
    pub async fn append(&self, mut message: Message) -> Result<Message> {
        let id = self.db.insert(MESSAGES, to_document(&message)?).await?;
        message.id = id;

        debug!("Stored message: {}", message.id);
        Ok(message)
    }

    /// Get message by ID
    pub async fn get(&self, id: &str) -> Result<Option<Message>> {
        self.db
            .get(MESSAGES, id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Messages of a conversation, oldest first
    pub async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages = self
            .load(&Filter::eq("conversationId", conversation_id))
            .await?;

        // Stable, so equal timestamps keep insertion order.
        messages.sort_by_key(|m| m.timestamp);

        debug!(
            "Retrieved {} messages from conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(messages)
    }

    /// Unread messages addressed to `receiver_id`, optionally limited to one conversation
    pub async fn list_unread_for(
        &self,
        receiver_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut filters = vec![
            Filter::eq("receiverId", receiver_id),
            Filter::eq("read", false),
        ];
        if let Some(conversation_id) = conversation_id {
            filters.push(Filter::eq("conversationId", conversation_id));
        }

        self.load(&Filter::And(filters)).await
    }

    /// Link a message to its conversation.
    ///
    /// The link is written once: repeating it is a no-op, changing it fails.
    pub async fn assign_conversation(&self, message_id: &str, conversation_id: &str) -> Result<()> {
        let message = self
            .get(message_id)
            .await?
            .ok_or_else(|| StoreError::not_found(MESSAGES, message_id))?;

        match message.conversation_id.as_deref() {
            Some(existing) if existing == conversation_id => Ok(()),
            Some(existing) => Err(StoreError::Validation(format!(
                "message {} already belongs to conversation {}",
                message_id, existing
            ))),
            None => {
                self.db
                    .update(
                        MESSAGES,
                        message_id,
                        vec![Patch::Set(
                            "conversationId".into(),
                            Value::from(conversation_id),
                        )],
                    )
                    .await
            }
        }
    }

    /// Every stored message, in insertion order
    pub async fn list_all(&self) -> Result<Vec<Message>> {
        self.load(&Filter::All).await
    }

    /// Point messages at their conversation, overwriting whatever link they
    /// carry, in one atomic batch.
    ///
    /// Only for records whose link names no stored conversation, such as the
    /// placeholder ids written by the browser mock. Resolved links go through
    /// [`MessageStore::assign_conversation`].
    pub async fn relink(&self, links: &[(String, String)]) -> Result<()> {
        let writes = links
            .iter()
            .map(|(message_id, conversation_id)| {
                Write::new(
                    MESSAGES,
                    message_id,
                    vec![Patch::Set(
                        "conversationId".into(),
                        Value::from(conversation_id.as_str()),
                    )],
                )
            })
            .collect();

        self.db.batch(writes).await?;

        debug!("Relinked {} messages", links.len());
        Ok(())
    }

    /// Flip `read` on every listed message in one atomic batch
    pub async fn mark_read(&self, ids: &[String]) -> Result<()> {
        let writes = ids
            .iter()
            .map(|id| Write::new(MESSAGES, id, vec![Patch::Set("read".into(), Value::Bool(true))]))
            .collect();

        self.db.batch(writes).await?;

        debug!("Marked {} messages as read", ids.len());
        Ok(())
    }

    async fn load(&self, filter: &Filter) -> Result<Vec<Message>> {
        self.db
            .query(MESSAGES, filter)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }
}
