//! In-memory object store used by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ObjectStoreError;
use crate::store::{ObjectMeta, ObjectStore, UploadReceipt};

struct StoredObject {
    bytes: Vec<u8>,
    content_type: Option<String>,
    etag: String,
    last_modified: chrono::DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for fixtures: a store with one ready bucket.
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store
            .buckets
            .lock()
            .unwrap()
            .insert(bucket.to_string(), BTreeMap::new());
        store
    }
}

fn weak_etag(bytes: &[u8]) -> String {
    // Content-derived, not cryptographic. Callers only use etags for
    // change detection.
    let mut acc: u64 = 0xcbf29ce484222325;
    for b in bytes {
        acc ^= *b as u64;
        acc = acc.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", acc)
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        _metadata: Option<HashMap<String, String>>,
    ) -> Result<UploadReceipt, ObjectStoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        let etag = weak_etag(&bytes);
        let size = bytes.len() as u64;
        b.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.map(|s| s.to_string()),
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(UploadReceipt {
            etag: Some(etag),
            size,
            version: None,
        })
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        b.get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| ObjectStoreError::FileNotFound(format!("{}/{}", bucket, path)))
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        Ok(b.remove(path).is_some())
    }

    async fn exists(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets
            .get(bucket)
            .map(|b| b.contains_key(path))
            .unwrap_or(false))
    }

    async fn stat(&self, bucket: &str, path: &str) -> Result<ObjectMeta, ObjectStoreError> {
        let buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        let obj = b
            .get(path)
            .ok_or_else(|| ObjectStoreError::FileNotFound(format!("{}/{}", bucket, path)))?;
        Ok(ObjectMeta {
            path: path.to_string(),
            size: obj.bytes.len() as u64,
            etag: Some(obj.etag.clone()),
            content_type: obj.content_type.clone(),
            last_modified: Some(obj.last_modified),
        })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectMeta>, ObjectStoreError> {
        let buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        Ok(b.iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .filter(|(path, _)| recursive || !path[prefix.len()..].contains('/'))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                size: obj.bytes.len() as u64,
                etag: Some(obj.etag.clone()),
                content_type: obj.content_type.clone(),
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn presigned_read_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_secs: u64,
    ) -> Result<String, ObjectStoreError> {
        if !self.exists(bucket, path).await? {
            return Err(ObjectStoreError::FileNotFound(format!(
                "{}/{}",
                bucket, path
            )));
        }
        Ok(format!("memory://{}/{}?expires={}", bucket, path, ttl_secs))
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> Result<(), ObjectStoreError> {
        let bytes = self.download(src_bucket, src_path).await?;
        let content_type = self.stat(src_bucket, src_path).await?.content_type;
        self.upload(dst_bucket, dst_path, bytes, content_type.as_deref(), None)
            .await?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self.buckets.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_round_trip() {
        let store = MemoryObjectStore::with_bucket("b");
        store
            .upload("b", "a/file.txt", b"hello".to_vec(), Some("text/plain"), None)
            .await
            .unwrap();
        assert_eq!(store.download("b", "a/file.txt").await.unwrap(), b"hello");
        assert!(store.delete("b", "a/file.txt").await.unwrap());
        assert!(!store.exists("b", "a/file.txt").await.unwrap());
    }

    #[tokio::test]
    async fn missing_bucket_and_file_fail_distinctly() {
        let store = MemoryObjectStore::with_bucket("b");
        let err = store.download("nope", "x").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::BucketNotFound(_)));
        let err = store.download("b", "x").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn list_respects_prefix_and_recursion() {
        let store = MemoryObjectStore::with_bucket("b");
        for path in ["p/a.txt", "p/sub/b.txt", "q/c.txt"] {
            store
                .upload("b", path, b"x".to_vec(), None, None)
                .await
                .unwrap();
        }
        let all = store.list("b", "p/", true).await.unwrap();
        assert_eq!(all.len(), 2);
        let shallow = store.list("b", "p/", false).await.unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].path, "p/a.txt");
    }
}
