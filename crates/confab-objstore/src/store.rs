use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ObjectStoreError;

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub etag: Option<String>,
    pub size: u64,
    pub version: Option<String>,
}

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Abstract interface for blob storage.
///
/// Failure semantics: operations on a missing bucket fail with
/// `BucketNotFound`, on a missing object with `FileNotFound`; everything
/// else maps to the operation-specific kind or `Storage`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<UploadReceipt, ObjectStoreError>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Idempotent; returns whether an object was removed.
    async fn delete(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError>;

    async fn exists(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError>;

    async fn stat(&self, bucket: &str, path: &str) -> Result<ObjectMeta, ObjectStoreError>;

    /// Non-recursive listings stop at the next `/` after the prefix.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectMeta>, ObjectStoreError>;

    async fn presigned_read_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_secs: u64,
    ) -> Result<String, ObjectStoreError>;

    async fn copy(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> Result<(), ObjectStoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    async fn list_buckets(&self) -> Result<Vec<String>, ObjectStoreError>;
}
