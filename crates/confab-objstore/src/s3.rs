//! S3-compatible adapter (MinIO, AWS S3) over aws-sdk-s3.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use confab_core::config::ObjectStoreConfig;

use crate::error::ObjectStoreError;
use crate::store::{ObjectMeta, ObjectStore, UploadReceipt};

pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Build a client against a custom endpoint with static credentials.
    /// Path-style addressing keeps MinIO happy.
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "confab-static",
        );
        let endpoint = if config.endpoint.starts_with("http") {
            config.endpoint.clone()
        } else if config.secure {
            format!("https://{}", config.endpoint)
        } else {
            format!("http://{}", config.endpoint)
        };
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        info!(endpoint = %endpoint, "object store client initialized");
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }

    /// Probe reachability by listing buckets.
    pub async fn connect(&self) -> Result<(), ObjectStoreError> {
        self.client
            .list_buckets()
            .send()
            .await
            .map_err(|e| ObjectStoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

/// Map an SDK error by its service error code; `fallback` builds the
/// catch-all kind from the rendered message.
fn classify<E, R>(
    bucket: &str,
    path: &str,
    err: aws_sdk_s3::error::SdkError<E, R>,
    fallback: fn(String) -> ObjectStoreError,
) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    if matches!(err, aws_sdk_s3::error::SdkError::DispatchFailure(_)) {
        return ObjectStoreError::Connection(format!("{:?}", err));
    }
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") => {
            ObjectStoreError::FileNotFound(format!("{}/{}", bucket, path))
        }
        Some("NoSuchBucket") => ObjectStoreError::BucketNotFound(bucket.to_string()),
        _ => fallback(format!("{}/{}: {}", bucket, path, err)),
    }
}

fn to_chrono(dt: aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<UploadReceipt, ObjectStoreError> {
        let size = bytes.len() as u64;
        let out = self
            .client
            .put_object()
            .bucket(bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type.unwrap_or("application/octet-stream"))
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| classify(bucket, path, e, ObjectStoreError::Upload))?;

        debug!(bucket, path, size, "object uploaded");
        Ok(UploadReceipt {
            etag: out.e_tag().map(|s| s.to_string()),
            size,
            version: out.version_id().map(|s| s.to_string()),
        })
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| classify(bucket, path, e, ObjectStoreError::Download))?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Download(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError> {
        if !self.exists(bucket, path).await? {
            return Ok(false);
        }
        self.client
            .delete_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| classify(bucket, path, e, ObjectStoreError::Delete))?;
        debug!(bucket, path, "object deleted");
        Ok(true)
    }

    async fn exists(&self, bucket: &str, path: &str) -> Result<bool, ObjectStoreError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(bucket, path, e, ObjectStoreError::Storage) {
                ObjectStoreError::FileNotFound(_) | ObjectStoreError::BucketNotFound(_) => {
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    async fn stat(&self, bucket: &str, path: &str) -> Result<ObjectMeta, ObjectStoreError> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| classify(bucket, path, e, ObjectStoreError::Storage))?;
        Ok(ObjectMeta {
            path: path.to_string(),
            size: out.content_length().unwrap_or(0).max(0) as u64,
            etag: out.e_tag().map(|s| s.to_string()),
            content_type: out.content_type().map(|s| s.to_string()),
            last_modified: out.last_modified().and_then(|dt| to_chrono(*dt)),
        })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectMeta>, ObjectStoreError> {
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.clone());
            if !recursive {
                req = req.delimiter("/");
            }
            let page = req
                .send()
                .await
                .map_err(|e| classify(bucket, prefix, e, ObjectStoreError::Storage))?;

            for obj in page.contents() {
                out.push(ObjectMeta {
                    path: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    etag: obj.e_tag().map(|s| s.to_string()),
                    content_type: None,
                    last_modified: obj.last_modified().and_then(|dt| to_chrono(*dt)),
                });
            }

            continuation = page.next_continuation_token().map(|s| s.to_string());
            if continuation.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn presigned_read_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_secs: u64,
    ) -> Result<String, ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(ttl_secs))
            .map_err(|e| ObjectStoreError::Storage(e.to_string()))?;
        let req = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| classify(bucket, path, e, ObjectStoreError::Storage))?;
        Ok(req.uri().to_string())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, src_path))
            .bucket(dst_bucket)
            .key(dst_path)
            .send()
            .await
            .map_err(|e| classify(src_bucket, src_path, e, ObjectStoreError::Storage))?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "bucket created");
                Ok(())
            }
            Err(e) => match e.code() {
                // Racing creators are fine; the bucket exists either way.
                Some("BucketAlreadyOwnedByYou") | Some("BucketAlreadyExists") => Ok(()),
                _ => Err(ObjectStoreError::Storage(e.to_string())),
            },
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match classify(bucket, "", e, ObjectStoreError::Storage) {
                ObjectStoreError::BucketNotFound(_) | ObjectStoreError::FileNotFound(_) => {
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify(bucket, "", e, ObjectStoreError::Delete))?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ObjectStoreError> {
        let out = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| ObjectStoreError::Connection(e.to_string()))?;
        Ok(out
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(|s| s.to_string()))
            .collect())
    }
}
