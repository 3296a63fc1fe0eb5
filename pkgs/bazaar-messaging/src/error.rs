use bazaar_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(reason) => MessagingError::Validation(reason),
            StoreError::NotFound { collection, id } => {
                MessagingError::NotFound(format!("{} {}", collection, id))
            }
            StoreError::StorageUnavailable(reason) => MessagingError::StorageUnavailable(reason),
            other => MessagingError::Store(other),
        }
    }
}

pub type Result<T, E = MessagingError> = std::result::Result<T, E>;
