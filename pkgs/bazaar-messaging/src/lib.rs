//! Bazaar Messaging - buyer/seller conversations on top of `bazaar-store`
//!
//! - **ConversationResolver**: sends messages, finds or creates the shared
//!   conversation of the two participants and keeps its snapshot and unread
//!   counters current
//! - **UnreadCounterService** / **UnreadPoller**: per-user unread totals and
//!   the periodic refresh behind the unread badge
//! - **MessagingConfig**: conversation scope, mark-as-read scope, poll period
//!   and storage settings
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bazaar_messaging::{ConversationResolver, MessagingConfig, SendMessage};
//! use bazaar_store::SystemClock;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MessagingConfig::default();
//! let db = Arc::new(config.persistence.database_info().connect().await?);
//! let resolver = ConversationResolver::new(db, Arc::new(SystemClock), &config);
//!
//! let message = resolver
//!     .send_message(SendMessage {
//!         sender_id: "buyer-1".into(),
//!         sender_name: "Ada".into(),
//!         receiver_id: "vendor-7".into(),
//!         receiver_name: "Corner Shop".into(),
//!         content: "Is this still available?".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("sent into {:?}", message.conversation_id);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod resolver;
mod unread;

pub use config::*;
pub use error::*;
pub use resolver::*;
pub use unread::*;
