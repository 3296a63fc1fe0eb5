//! Bazaar Store - Persistent storage for marketplace messaging
//!
//! This crate provides the storage side of buyer/seller messaging: a small
//! document store interface, two interchangeable backends behind it, and the
//! message and conversation stores written once against that interface.
//!
//! # Architecture
//!
//! - **DocumentStore**: collection/document interface (insert, get, query,
//!   patch-style update and atomic batches)
//! - **SqliteDocumentStore**: Sea-ORM/SQLite backend standing in for the remote
//!   document database
//! - **LocalDocumentStore**: the offline mock backend, one JSON-array blob per
//!   collection, rewritten in full on every operation
//! - **Database**: tagged variant over both backends
//! - **MessageStore**: append-only message records, queryable by conversation
//! - **ConversationStore**: conversation records, queryable by participant
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bazaar_store::{ConversationStore, DatabaseInfo, MessageStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Arc::new(DatabaseInfo::Sqlite { path: "bazaar.db".into() }.connect().await?);
//!
//! let messages = MessageStore::new(db.clone());
//! let conversations = ConversationStore::new(db);
//!
//! for conversation in conversations.list_by_participant("buyer-1").await? {
//!     let thread = messages.list_by_conversation(&conversation.id).await?;
//!     println!("{}: {} messages", conversation.id, thread.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod conversation_store;
pub mod database;
pub mod document;
pub mod entities;
pub mod error;
pub mod local_store;
pub mod message_store;
pub mod migration;
pub mod models;
pub mod sqlite_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation_store::{conversation_key, pick_for_pair, ConversationStore};
pub use database::{Backend, Database, DatabaseInfo};
pub use document::{Document, DocumentStore, FieldPath, Filter, Patch, Write};
pub use error::{Result, StoreError};
pub use local_store::{BlobKeys, BlobStorage, FileBlobStorage, LocalDocumentStore, MemoryBlobStorage};
pub use message_store::MessageStore;
pub use models::{Conversation, ConversationScope, LastMessage, Message};
pub use sqlite_store::SqliteDocumentStore;

/// Collection holding message documents
pub const MESSAGES: &str = "messages";

/// Collection holding conversation documents
pub const CONVERSATIONS: &str = "conversations";

/// Configuration for persistence layer
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Which backend to open
    pub backend: Backend,

    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Directory holding the local blobs
    pub local_dir: std::path::PathBuf,

    /// Blob keys used by the local backend
    pub blob_keys: BlobKeys,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            db_path: std::path::PathBuf::from("bazaar-store.db"),
            local_dir: std::path::PathBuf::from(".bazaar"),
            blob_keys: BlobKeys::default(),
        }
    }
}

impl PersistenceConfig {
    /// Describe the database this configuration points at
    pub fn database_info(&self) -> DatabaseInfo {
        match self.backend {
            Backend::Sqlite => DatabaseInfo::Sqlite {
                path: self.db_path.clone(),
            },
            Backend::Local => DatabaseInfo::Local {
                dir: self.local_dir.clone(),
                keys: self.blob_keys.clone(),
            },
            Backend::Memory => DatabaseInfo::Memory {
                keys: self.blob_keys.clone(),
            },
        }
    }
}
