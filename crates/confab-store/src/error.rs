use confab_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Propagation policy for store failures surfaced to API callers.
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Connection(msg) => ApiError::ServiceUnavailable(msg),
            StoreError::CollectionNotFound(msg) | StoreError::Query(msg) => {
                ApiError::Internal(msg)
            }
            StoreError::Serialization(e) => ApiError::Internal(e.to_string()),
        }
    }
}
