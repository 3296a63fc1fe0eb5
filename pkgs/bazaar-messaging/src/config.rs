use std::path::Path;
use std::time::Duration;

use bazaar_store::{ConversationScope, PersistenceConfig};
use serde::{Deserialize, Serialize};

use crate::error::{MessagingError, Result};

/// Which messages a mark-as-read request flips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadScope {
    /// Every unread message addressed to the user, whatever its conversation.
    /// Matches what existing clients and persisted data expect.
    #[default]
    AllConversations,
    /// Only the unread messages of the conversation being opened
    Conversation,
}

/// Messaging behaviour
///
/// Loaded from JSON; every field is optional and falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// How conversation identity is derived from a send request
    pub scope: ConversationScope,
    /// What mark-as-read sweeps
    pub read_scope: ReadScope,
    /// Refresh period of the unread badge (min: 1s, max: 1h)
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Storage backend settings
    pub persistence: PersistenceConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            scope: ConversationScope::Pair,
            read_scope: ReadScope::AllConversations,
            poll_interval: Duration::from_secs(30),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl MessagingConfig {
    /// Minimum allowed poll interval: 1 second
    const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Maximum allowed poll interval: 1 hour
    const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

    /// Read and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MessagingError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            MessagingError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval < Self::MIN_POLL_INTERVAL {
            return Err(MessagingError::Config(format!(
                "Poll interval too short: {:?} (min: {:?})",
                self.poll_interval,
                Self::MIN_POLL_INTERVAL
            )));
        }
        if self.poll_interval > Self::MAX_POLL_INTERVAL {
            return Err(MessagingError::Config(format!(
                "Poll interval too long: {:?} (max: {:?})",
                self.poll_interval,
                Self::MAX_POLL_INTERVAL
            )));
        }

        Ok(())
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_store::Backend;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MessagingConfig::default();

        assert_eq!(config.scope, ConversationScope::Pair);
        assert_eq!(config.read_scope, ReadScope::AllConversations);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "scope": "pair_and_product",
                "poll_interval": "1m 30s",
                "persistence": {{ "backend": "local", "local_dir": "/tmp/bazaar" }}
            }}"#
        )
        .unwrap();

        let config = MessagingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.scope, ConversationScope::PairAndProduct);
        assert_eq!(config.read_scope, ReadScope::AllConversations);
        assert_eq!(config.poll_interval, Duration::from_secs(90));
        assert_eq!(config.persistence.backend, Backend::Local);
        assert_eq!(config.persistence.blob_keys.messages, "mockMessages");
    }

    #[test]
    fn test_rejects_out_of_range_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "poll_interval": "100ms" }}"#).unwrap();

        let err = MessagingConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, MessagingError::Config(_)));
    }

    #[test]
    fn test_interval_round_trips_as_text() {
        let json = serde_json::to_value(MessagingConfig::default()).unwrap();
        assert_eq!(json["poll_interval"], "30s");
        assert_eq!(json["read_scope"], "all_conversations");
    }
}
