//! File service: contextual uploads, validation, duplicate flagging,
//! object layout, and prefix-cascading deletion.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use confab_core::config::{UploadConfig, PRESIGNED_URL_TTL_SECS};
use confab_core::policy;
use confab_core::types::{FileScope, Principal};
use confab_core::{ApiError, Result};
use confab_objstore::ObjectStore;
use confab_store::{DocumentStore, Page};

use crate::catalog::{FileFilter, FileRepo};
use crate::checksums;
use crate::queue::ProcessingQueue;
use crate::types::{FileRecord, ProcessingStatus};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub scope: FileScope,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub file: FileRecord,
    /// Set when another file with the same sha256 already exists. Not an
    /// error; both records live on independently.
    pub duplicate: bool,
    pub download_url: String,
}

pub struct FileService {
    repo: FileRepo,
    queue: ProcessingQueue,
    storage: Arc<dyn ObjectStore>,
    bucket: String,
    uploads: UploadConfig,
}

impl FileService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStore>,
        bucket: String,
        uploads: UploadConfig,
    ) -> Self {
        Self {
            repo: FileRepo::new(store.clone()),
            queue: ProcessingQueue::new(store),
            storage,
            bucket,
            uploads,
        }
    }

    /// Create the backing bucket when it does not exist yet.
    pub async fn ensure_bucket(&self) -> Result<()> {
        if !self.storage.bucket_exists(&self.bucket).await? {
            self.storage.create_bucket(&self.bucket).await?;
            info!(bucket = %self.bucket, "upload bucket created");
        }
        Ok(())
    }

    pub async fn upload(&self, caller: &Principal, req: UploadRequest) -> Result<UploadedFile> {
        if !policy::can_upload_file(caller, req.scope) {
            return Err(ApiError::Forbidden(
                "system uploads require manager or root role".to_string(),
            ));
        }
        if req.scope == FileScope::UserProject && req.project_id.is_none() {
            return Err(ApiError::BadRequest(
                "project_id is required for user_project scope".to_string(),
            ));
        }
        self.validate_size(&req.bytes)?;
        self.validate_type(&req.filename, req.content_type.as_deref())?;

        let sums = checksums::compute(&req.bytes);
        let duplicate = !self
            .repo
            .find_by_checksum("sha256", &sums.sha256)
            .await?
            .is_empty();
        if duplicate {
            warn!(name = %req.filename, sha256 = %sums.sha256, "duplicate file content uploaded");
        }

        let file_id = Uuid::new_v4().to_string();
        let base_path = build_base_path(req.scope, &caller.id, &file_id, req.project_id.as_deref())?;
        let content_type = req
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let record = FileRecord {
            id: file_id.clone(),
            name: req.filename.clone(),
            size: req.bytes.len() as u64,
            content_type: content_type.clone(),
            object_path: base_path,
            scope: req.scope,
            project_id: req.project_id.clone(),
            checksums: sums,
            processing_status: ProcessingStatus::pending(),
            uploaded_by: Some(caller.id.clone()),
            uploaded_at: Utc::now(),
            promoted: false,
            promoted_at: None,
            promoted_by: None,
            promoted_from: None,
        };

        // Raw bytes plus the companion metadata document.
        self.storage
            .upload(
                &self.bucket,
                &record.input_object_path(),
                req.bytes,
                Some(&content_type),
                Some(
                    [("original_name".to_string(), req.filename.clone())]
                        .into_iter()
                        .collect(),
                ),
            )
            .await?;
        let metadata = serde_json::json!({
            "file_id": record.id,
            "original_name": record.name,
            "size": record.size,
            "content_type": record.content_type,
            "uploaded_at": record.uploaded_at,
            "uploaded_by": record.uploaded_by,
            "scope": record.scope,
            "project_id": record.project_id,
            "checksums": record.checksums,
        });
        self.storage
            .upload(
                &self.bucket,
                &record.metadata_object_path(),
                serde_json::to_vec_pretty(&metadata)?,
                Some("application/json"),
                None,
            )
            .await?;

        let saved = self.repo.insert(&record).await?;
        self.queue.enqueue_for_file(&saved.id).await?;

        let download_url = self
            .storage
            .presigned_read_url(
                &self.bucket,
                &saved.input_object_path(),
                PRESIGNED_URL_TTL_SECS,
            )
            .await?;

        info!(file_id = %saved.id, scope = %saved.scope, size = saved.size, "file uploaded");
        Ok(UploadedFile {
            file: saved,
            duplicate,
            download_url,
        })
    }

    pub async fn get(&self, caller: &Principal, id: &str) -> Result<FileRecord> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("file not found".to_string()))?;
        if !policy::can_read_file(caller, record.scope, record.uploaded_by.as_deref()) {
            return Err(ApiError::Forbidden("access denied to this file".to_string()));
        }
        Ok(record)
    }

    pub async fn download_url(
        &self,
        caller: &Principal,
        id: &str,
        ttl_secs: Option<u64>,
    ) -> Result<String> {
        let record = self.get(caller, id).await?;
        Ok(self
            .storage
            .presigned_read_url(
                &self.bucket,
                &record.input_object_path(),
                ttl_secs.unwrap_or(PRESIGNED_URL_TTL_SECS),
            )
            .await?)
    }

    /// Listing applies the per-scope read rules after the store filter.
    pub async fn list(
        &self,
        caller: &Principal,
        filter: FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>> {
        let records = self.repo.list(&filter, page).await?;
        Ok(records
            .into_iter()
            .filter(|r| policy::can_read_file(caller, r.scope, r.uploaded_by.as_deref()))
            .collect())
    }

    pub async fn search(
        &self,
        caller: &Principal,
        needle: &str,
        filter: FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>> {
        let records = self.repo.search_by_name(needle, &filter, page).await?;
        Ok(records
            .into_iter()
            .filter(|r| policy::can_read_file(caller, r.scope, r.uploaded_by.as_deref()))
            .collect())
    }

    /// Delete the record, every object under its prefix, and any queued
    /// processing work.
    pub async fn delete(&self, caller: &Principal, id: &str) -> Result<()> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("file not found".to_string()))?;
        if !policy::can_delete_file(caller, record.uploaded_by.as_deref()) {
            return Err(ApiError::Forbidden(
                "only the uploader or a manager can delete this file".to_string(),
            ));
        }

        let prefix = format!("{}/", record.object_path);
        let objects = self.storage.list(&self.bucket, &prefix, true).await?;
        for object in objects {
            self.storage.delete(&self.bucket, &object.path).await?;
        }
        self.queue.delete_for_file(id).await?;
        self.repo.delete(id).await?;
        info!(file_id = id, "file and objects deleted");
        Ok(())
    }
}

impl FileService {
    fn validate_size(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.uploads.max_file_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "file too large; max {} bytes",
                self.uploads.max_file_size
            )));
        }
        Ok(())
    }

    fn validate_type(&self, filename: &str, content_type: Option<&str>) -> Result<()> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()));
        let allowed_ext = extension
            .as_deref()
            .map(|ext| self.uploads.allowed_extensions.iter().any(|a| a == ext))
            .unwrap_or(false);
        if !allowed_ext {
            return Err(ApiError::BadRequest(format!(
                "invalid file type; allowed: {}",
                self.uploads.allowed_extensions.join(", ")
            )));
        }
        if let Some(ct) = content_type {
            if !self.uploads.allowed_content_types.iter().any(|a| a == ct) {
                return Err(ApiError::BadRequest(format!(
                    "invalid content type: {}",
                    ct
                )));
            }
        }
        Ok(())
    }
}

fn build_base_path(
    scope: FileScope,
    user_id: &str,
    file_id: &str,
    project_id: Option<&str>,
) -> Result<String> {
    Ok(match scope {
        FileScope::System => format!("system/{}", file_id),
        FileScope::UserGlobal => format!("user/{}/global/{}", user_id, file_id),
        FileScope::UserProject => {
            let project = project_id.ok_or_else(|| {
                ApiError::BadRequest("project_id is required for user_project scope".to_string())
            })?;
            format!("user/{}/project/{}/{}", user_id, project, file_id)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FILES;
    use crate::queue::PROCESSING_QUEUE;
    use confab_core::types::UserRole;
    use confab_objstore::MemoryObjectStore;
    use confab_store::MemoryStore;

    const BUCKET: &str = "confab-files";

    async fn service() -> (FileService, Arc<MemoryStore>, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryStore::new());
        for c in [FILES, PROCESSING_QUEUE] {
            store.create_collection(c).await.unwrap();
        }
        let storage = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let svc = FileService::new(
            store.clone(),
            storage.clone(),
            BUCKET.to_string(),
            UploadConfig::default(),
        );
        (svc, store, storage)
    }

    fn user(id: &str) -> Principal {
        Principal::new(id, UserRole::User, vec![])
    }

    fn manager() -> Principal {
        Principal::new("mgr", UserRole::Manager, vec![])
    }

    fn upload_req(filename: &str, scope: FileScope) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            content_type: Some("text/plain".to_string()),
            bytes: b"file body".to_vec(),
            scope,
            project_id: None,
        }
    }

    #[tokio::test]
    async fn upload_writes_object_metadata_and_queue() {
        let (svc, _, storage) = service().await;
        let uploaded = svc
            .upload(&user("u1"), upload_req("notes.txt", FileScope::UserGlobal))
            .await
            .unwrap();

        assert!(!uploaded.duplicate);
        assert!(uploaded
            .file
            .object_path
            .starts_with(&format!("user/u1/global/{}", uploaded.file.id)));
        assert!(uploaded.download_url.contains(&uploaded.file.id));

        // Raw bytes + metadata.json both landed under the base prefix.
        let objects = storage
            .list(BUCKET, &format!("{}/", uploaded.file.object_path), true)
            .await
            .unwrap();
        let paths: Vec<_> = objects.iter().map(|o| o.path.clone()).collect();
        assert!(paths
            .iter()
            .any(|p| p.ends_with("01-input_data/original.txt")));
        assert!(paths.iter().any(|p| p.ends_with("metadata.json")));

        // All phases pending in the processing status.
        assert_eq!(uploaded.file.processing_status.phases.len(), 5);
    }

    #[tokio::test]
    async fn duplicate_content_is_flagged_not_rejected() {
        let (svc, _, _) = service().await;
        let first = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::UserGlobal))
            .await
            .unwrap();
        let second = svc
            .upload(&user("u1"), upload_req("b.txt", FileScope::UserGlobal))
            .await
            .unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_ne!(first.file.id, second.file.id);
        assert_eq!(first.file.checksums.sha256, second.file.checksums.sha256);
    }

    #[tokio::test]
    async fn system_scope_requires_manager() {
        let (svc, _, _) = service().await;
        let err = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::System))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let ok = svc
            .upload(&manager(), upload_req("a.txt", FileScope::System))
            .await
            .unwrap();
        assert!(ok.file.object_path.starts_with("system/"));
    }

    #[tokio::test]
    async fn project_scope_requires_project_id() {
        let (svc, _, _) = service().await;
        let err = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::UserProject))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut req = upload_req("a.txt", FileScope::UserProject);
        req.project_id = Some("p1".to_string());
        let ok = svc.upload(&user("u1"), req).await.unwrap();
        assert!(ok.file.object_path.starts_with("user/u1/project/p1/"));
    }

    #[tokio::test]
    async fn bad_extension_and_oversize_are_rejected() {
        let (svc, _, _) = service().await;
        let err = svc
            .upload(&user("u1"), upload_req("malware.exe", FileScope::UserGlobal))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut big = upload_req("big.txt", FileScope::UserGlobal);
        big.bytes = vec![0u8; 50 * 1024 * 1024 + 1];
        let err = svc.upload(&user("u1"), big).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn read_rules_per_scope() {
        let (svc, _, _) = service().await;
        let mine = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::UserGlobal))
            .await
            .unwrap();

        // uploader reads, another user does not, nor does a manager
        svc.get(&user("u1"), &mine.file.id).await.unwrap();
        assert!(matches!(
            svc.get(&user("u2"), &mine.file.id).await.unwrap_err(),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            svc.get(&manager(), &mine.file.id).await.unwrap_err(),
            ApiError::Forbidden(_)
        ));

        let system = svc
            .upload(&manager(), upload_req("s.txt", FileScope::System))
            .await
            .unwrap();
        svc.get(&user("u2"), &system.file.id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_cascades_to_objects_and_queue() {
        let (svc, store, storage) = service().await;
        let uploaded = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::UserGlobal))
            .await
            .unwrap();

        svc.delete(&user("u1"), &uploaded.file.id).await.unwrap();

        let objects = storage
            .list(BUCKET, &format!("{}/", uploaded.file.object_path), true)
            .await
            .unwrap();
        assert!(objects.is_empty());
        assert_eq!(store.count(FILES, &[]).await.unwrap(), 0);
        assert_eq!(store.count(PROCESSING_QUEUE, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn uploader_or_manager_can_delete() {
        let (svc, _, _) = service().await;
        let uploaded = svc
            .upload(&user("u1"), upload_req("a.txt", FileScope::UserGlobal))
            .await
            .unwrap();
        assert!(matches!(
            svc.delete(&user("u2"), &uploaded.file.id).await.unwrap_err(),
            ApiError::Forbidden(_)
        ));
        svc.delete(&manager(), &uploaded.file.id).await.unwrap();
    }

    #[tokio::test]
    async fn name_search_is_case_insensitive() {
        let (svc, _, _) = service().await;
        svc.upload(&user("u1"), upload_req("Quarterly-Report.pdf", FileScope::UserGlobal))
            .await
            .unwrap();
        svc.upload(&user("u1"), upload_req("notes.txt", FileScope::UserGlobal))
            .await
            .unwrap();

        let hits = svc
            .search(&user("u1"), "report", FileFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Quarterly-Report.pdf");
    }
}
