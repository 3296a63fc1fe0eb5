//! Conversation resolver - turns one-way sends into shared conversations
//!
//! A send appends the message, then finds the conversation of the two
//! participants or creates it, keeps its last-message snapshot and unread
//! counters current, and finally links the message to it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bazaar_store::{
    conversation_key, pick_for_pair, Clock, Conversation, ConversationScope, ConversationStore,
    DocumentStore, LastMessage, Message, MessageStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{MessagingConfig, ReadScope};
use crate::error::{MessagingError, Result};

/// Display name used for a buyer without one
pub const DEFAULT_BUYER_NAME: &str = "User";

/// Display name used for a vendor without one
pub const DEFAULT_VENDOR_NAME: &str = "Vendor";

/// A message to be sent; the conversation is resolved, never supplied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default)]
    pub sender_photo: Option<String>,
    pub receiver_id: String,
    pub receiver_name: String,
    pub content: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl SendMessage {
    fn validate(&self) -> Result<()> {
        if self.sender_id.trim().is_empty() {
            return Err(MessagingError::Validation("sender id is required".to_string()));
        }
        if self.receiver_id.trim().is_empty() {
            return Err(MessagingError::Validation("receiver id is required".to_string()));
        }
        if self.sender_id == self.receiver_id {
            return Err(MessagingError::Validation(format!(
                "cannot send a message to oneself ({})",
                self.sender_id
            )));
        }
        if self.content.trim().is_empty() {
            return Err(MessagingError::Validation(
                "message content cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A buyer reaching out to the vendor of a product
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInquiry {
    pub buyer_id: String,
    #[serde(default)]
    pub buyer_name: String,
    #[serde(default)]
    pub buyer_photo: Option<String>,
    pub vendor_id: String,
    #[serde(default)]
    pub vendor_name: String,
    pub product_id: String,
    pub product_name: String,
}

impl ProductInquiry {
    /// Opening line sent on the buyer's behalf
    pub fn greeting(&self) -> String {
        format!(
            "Hello, I'm interested in your product \"{}\".",
            self.product_name
        )
    }
}

/// Conversation resolver over any document backend
#[derive(Clone)]
pub struct ConversationResolver {
    messages: MessageStore,
    conversations: ConversationStore,
    clock: Arc<dyn Clock>,
    scope: ConversationScope,
    read_scope: ReadScope,
}

impl ConversationResolver {
    pub fn new(db: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: &MessagingConfig) -> Self {
        Self {
            messages: MessageStore::new(db.clone()),
            conversations: ConversationStore::new(db),
            clock,
            scope: config.scope,
            read_scope: config.read_scope,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Send a message and resolve its conversation.
    ///
    /// The first message between two users creates their conversation with
    /// the receiver's counter at 1; later ones bump the receiver's counter
    /// and never touch the sender's. The returned message carries its
    /// conversation id.
    pub async fn send_message(&self, request: SendMessage) -> Result<Message> {
        request.validate()?;

        let now = self.clock.now();
        let message = self
            .messages
            .append(Message {
                id: String::new(),
                sender_id: request.sender_id,
                sender_name: request.sender_name,
                sender_photo: request.sender_photo,
                receiver_id: request.receiver_id,
                receiver_name: request.receiver_name,
                content: request.content.trim().to_string(),
                timestamp: now,
                read: false,
                conversation_id: None,
                product_id: request.product_id,
                product_name: request.product_name,
            })
            .await?;

        let existing = self
            .conversations
            .find_by_participant_pair(
                &message.sender_id,
                &message.receiver_id,
                self.scope,
                message.product_id.as_deref(),
            )
            .await?;

        let conversation_id = match existing {
            Some(conversation) => {
                self.conversations
                    .record_message(
                        &conversation.id,
                        &message.receiver_id,
                        &LastMessage::from(&message),
                        now,
                    )
                    .await?;
                conversation.id
            }
            None => self.open_conversation(&message, now).await?,
        };

        self.messages
            .assign_conversation(&message.id, &conversation_id)
            .await?;

        debug!(
            "Message {} from {} to {} resolved to {}",
            message.id, message.sender_id, message.receiver_id, conversation_id
        );

        Ok(Message {
            conversation_id: Some(conversation_id),
            ..message
        })
    }

    /// Create the conversation opened by `message`, or join the one a
    /// concurrent sender created first.
    async fn open_conversation(&self, message: &Message, now: DateTime<Utc>) -> Result<String> {
        let id = conversation_key(
            &message.sender_id,
            &message.receiver_id,
            self.scope,
            message.product_id.as_deref(),
        );

        let mut participant_photos = BTreeMap::new();
        if let Some(photo) = &message.sender_photo {
            participant_photos.insert(message.sender_id.clone(), photo.clone());
        }

        let conversation = Conversation {
            id: id.clone(),
            participants: vec![message.sender_id.clone(), message.receiver_id.clone()],
            participant_names: BTreeMap::from([
                (message.sender_id.clone(), message.sender_name.clone()),
                (message.receiver_id.clone(), message.receiver_name.clone()),
            ]),
            participant_photos,
            last_message: Some(LastMessage::from(message)),
            unread_count: BTreeMap::from([
                (message.sender_id.clone(), 0),
                (message.receiver_id.clone(), 1),
            ]),
            created_at: now,
            updated_at: now,
            product_id: message.product_id.clone(),
            product_name: message.product_name.clone(),
        };

        if !self.conversations.create_if_absent(&conversation).await? {
            debug!("Conversation {} created concurrently, joining it", id);
            self.conversations
                .record_message(&id, &message.receiver_id, &LastMessage::from(message), now)
                .await?;
        }

        Ok(id)
    }

    /// Clear `user_id`'s unread state for a conversation.
    ///
    /// The counter is zeroed first, then unread messages addressed to the
    /// user are flipped in one batch: all of them under
    /// [`ReadScope::AllConversations`], only this conversation's under
    /// [`ReadScope::Conversation`]. A failed sweep leaves the counter at
    /// zero. Returns the number of messages flipped.
    pub async fn mark_messages_as_read(&self, conversation_id: &str, user_id: &str) -> Result<usize> {
        let conversation = self.get_conversation(conversation_id).await?;
        if !conversation.participants.iter().any(|p| p == user_id) {
            return Err(MessagingError::Validation(format!(
                "{} is not a participant of {}",
                user_id, conversation_id
            )));
        }

        self.conversations
            .reset_unread(conversation_id, user_id)
            .await?;

        let scoped_to = match self.read_scope {
            ReadScope::AllConversations => None,
            ReadScope::Conversation => Some(conversation_id),
        };
        let ids: Vec<String> = self
            .messages
            .list_unread_for(user_id, scoped_to)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        self.messages.mark_read(&ids).await?;

        debug!(
            "Marked {} messages read for {} ({:?})",
            ids.len(),
            user_id,
            self.read_scope
        );
        Ok(ids.len())
    }

    /// Link messages whose `conversationId` is missing or names no stored
    /// conversation to the conversation of their participant pair.
    ///
    /// Data written by the browser mock needs this once: its messages carry an
    /// empty or placeholder id. Messages whose pair has no conversation are
    /// left alone. Returns the number of messages relinked.
    pub async fn link_legacy_messages(&self) -> Result<usize> {
        let conversations = self.conversations.list_all().await?;
        let known: HashSet<&str> = conversations.iter().map(|c| c.id.as_str()).collect();

        let links: Vec<(String, String)> = self
            .messages
            .list_all()
            .await?
            .into_iter()
            .filter(|m| {
                m.conversation_id
                    .as_deref()
                    .map_or(true, |id| !known.contains(id))
            })
            .filter_map(|m| {
                pick_for_pair(
                    &conversations,
                    &m.sender_id,
                    &m.receiver_id,
                    self.scope,
                    m.product_id.as_deref(),
                )
                .map(|c| (m.id, c.id.clone()))
            })
            .collect();

        self.messages.relink(&links).await?;

        if !links.is_empty() {
            info!("Linked {} legacy messages to their conversations", links.len());
        }
        Ok(links.len())
    }

    /// Conversations of a user, most recently updated first
    pub async fn get_user_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        Ok(self.conversations.list_by_participant(user_id).await?)
    }

    /// Messages of a conversation, oldest first
    pub async fn get_conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self.messages.list_by_conversation(conversation_id).await?)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.conversations
            .get(conversation_id)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("conversation {}", conversation_id)))
    }

    /// Open (or reopen) the conversation between a buyer and the vendor of a
    /// product. A conversation about the same product is reused as is;
    /// otherwise the greeting is sent on the buyer's behalf.
    pub async fn contact_vendor(&self, inquiry: ProductInquiry) -> Result<Conversation> {
        if inquiry.product_id.trim().is_empty() {
            return Err(MessagingError::Validation("product id is required".to_string()));
        }

        let existing = self
            .conversations
            .find_by_participant_pair(
                &inquiry.buyer_id,
                &inquiry.vendor_id,
                ConversationScope::PairAndProduct,
                Some(&inquiry.product_id),
            )
            .await?;
        if let Some(conversation) = existing {
            debug!(
                "Reusing conversation {} for product {}",
                conversation.id, inquiry.product_id
            );
            return Ok(conversation);
        }

        let greeting = inquiry.greeting();
        let message = self
            .send_message(SendMessage {
                sender_id: inquiry.buyer_id,
                sender_name: name_or(inquiry.buyer_name, DEFAULT_BUYER_NAME),
                sender_photo: inquiry.buyer_photo,
                receiver_id: inquiry.vendor_id,
                receiver_name: name_or(inquiry.vendor_name, DEFAULT_VENDOR_NAME),
                content: greeting,
                product_id: Some(inquiry.product_id),
                product_name: Some(inquiry.product_name),
            })
            .await?;

        let conversation_id = message
            .conversation_id
            .ok_or_else(|| MessagingError::NotFound(format!("conversation of {}", message.id)))?;

        info!(
            "Buyer {} contacted vendor {} in {}",
            message.sender_id, message.receiver_id, conversation_id
        );
        self.get_conversation(&conversation_id).await
    }
}

fn name_or(name: String, fallback: &str) -> String {
    if name.trim().is_empty() {
        fallback.to_string()
    } else {
        name
    }
}
