//! File endpoints: multipart upload, listing, search, presigned downloads.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use confab_core::types::FileScope;
use confab_core::ApiError;
use confab_files::catalog::FileFilter;
use confab_files::service::{FileService, UploadRequest, UploadedFile};
use confab_files::FileRecord;
use confab_store::Page;

use crate::app::AppState;
use crate::error::{HttpError, HttpResult};
use crate::extract::Auth;

fn file_service(state: &AppState) -> FileService {
    FileService::new(
        state.store.clone(),
        state.storage.clone(),
        state.config.objstore.default_bucket.clone(),
        state.config.uploads.clone(),
    )
}

#[derive(Deserialize)]
pub struct FileListParams {
    pub scope: Option<String>,
    pub project_id: Option<String>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Deserialize)]
pub struct FileSearchParams {
    pub q: String,
    pub scope: Option<String>,
    pub project_id: Option<String>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Deserialize)]
pub struct DownloadUrlParams {
    pub ttl_secs: Option<u64>,
}

fn default_limit() -> u64 {
    100
}

fn parse_scope(raw: Option<&str>) -> Result<Option<FileScope>, HttpError> {
    raw.map(|s| {
        FileScope::from_str(s).map_err(|e| HttpError(ApiError::BadRequest(e)))
    })
    .transpose()
}

/// POST /files/upload with multipart fields `file` (required), `scope`,
/// and `project_id`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    mut multipart: Multipart,
) -> HttpResult<(StatusCode, Json<UploadedFile>)> {
    let mut filename = None;
    let mut content_type = None;
    let mut bytes = None;
    let mut scope = None;
    let mut project_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError(ApiError::BadRequest(format!("multipart: {}", e))))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| HttpError(ApiError::BadRequest(format!("multipart: {}", e))))?;
                bytes = Some(data.to_vec());
            }
            Some("scope") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| HttpError(ApiError::BadRequest(format!("multipart: {}", e))))?;
                scope = parse_scope(Some(&raw))?;
            }
            Some("project_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| HttpError(ApiError::BadRequest(format!("multipart: {}", e))))?;
                if !raw.is_empty() {
                    project_id = Some(raw);
                }
            }
            _ => {}
        }
    }

    let bytes =
        bytes.ok_or_else(|| HttpError(ApiError::BadRequest("missing file field".to_string())))?;
    let filename = filename
        .ok_or_else(|| HttpError(ApiError::BadRequest("missing filename".to_string())))?;

    let files = file_service(&state);
    let uploaded = files
        .upload(
            &principal,
            UploadRequest {
                filename,
                content_type,
                bytes,
                scope: scope.unwrap_or(FileScope::UserGlobal),
                project_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// GET /files: scope/project filters, per-scope read rules applied.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Query(params): Query<FileListParams>,
) -> HttpResult<Json<Vec<FileRecord>>> {
    let files = file_service(&state);
    let scope = parse_scope(params.scope.as_deref())?;
    let listed = files
        .list(
            &principal,
            FileFilter {
                scope,
                uploaded_by: None,
                project_id: params.project_id,
            },
            Page::new(params.skip, params.limit),
        )
        .await?;
    Ok(Json(listed))
}

/// GET /files/search?q=: case-insensitive substring over the name.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Query(params): Query<FileSearchParams>,
) -> HttpResult<Json<Vec<FileRecord>>> {
    let files = file_service(&state);
    let scope = parse_scope(params.scope.as_deref())?;
    let hits = files
        .search(
            &principal,
            &params.q,
            FileFilter {
                scope,
                uploaded_by: None,
                project_id: params.project_id,
            },
            Page::new(params.skip, params.limit),
        )
        .await?;
    Ok(Json(hits))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<Json<FileRecord>> {
    let files = file_service(&state);
    Ok(Json(files.get(&principal, &id).await?))
}

/// GET /files/{id}/download-url: presigned GET, 7-day default expiry.
pub async fn download_url(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Query(params): Query<DownloadUrlParams>,
) -> HttpResult<Json<serde_json::Value>> {
    let files = file_service(&state);
    let url = files.download_url(&principal, &id, params.ttl_secs).await?;
    Ok(Json(serde_json::json!({"url": url})))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let files = file_service(&state);
    files.delete(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
