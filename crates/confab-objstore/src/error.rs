use confab_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ObjectStoreError> for ApiError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::FileNotFound(msg) | ObjectStoreError::BucketNotFound(msg) => {
                ApiError::NotFound(msg)
            }
            ObjectStoreError::Connection(msg) => ApiError::ServiceUnavailable(msg),
            ObjectStoreError::Upload(msg)
            | ObjectStoreError::Download(msg)
            | ObjectStoreError::Delete(msg)
            | ObjectStoreError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}
