//! User-group endpoints: membership, managers, status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use confab_core::types::AccountStatus;
use confab_users::groups::UserGroupService;
use confab_users::UserGroup;

use crate::app::AppState;
use crate::error::HttpResult;
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct GroupCreateRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct GroupRenameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct GroupStatusRequest {
    pub status: AccountStatus,
}

/// GET /user-groups: visibility depends on the caller's role.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<Vec<UserGroup>>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.list_groups(&principal).await?))
}

/// POST /user-groups: root only.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<GroupCreateRequest>,
) -> HttpResult<(StatusCode, Json<UserGroup>)> {
    let groups = UserGroupService::new(state.store.clone());
    let created = groups.create_group(&principal, &req.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.get_group(&principal, &id).await?))
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<GroupRenameRequest>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.rename_group(&principal, &id, &req.name).await?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let groups = UserGroupService::new(state.store.clone());
    groups.delete_group(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /user-groups/{id}/status: root or assigned manager.
pub async fn toggle_status(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<GroupStatusRequest>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.toggle_status(&principal, &id, req.status).await?))
}

pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, user_id)): Path<(String, String)>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.add_member(&principal, &id, &user_id).await?))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, user_id)): Path<(String, String)>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.remove_member(&principal, &id, &user_id).await?))
}

pub async fn assign_manager(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, user_id)): Path<(String, String)>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.assign_manager(&principal, &id, &user_id).await?))
}

pub async fn remove_manager(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, user_id)): Path<(String, String)>,
) -> HttpResult<Json<UserGroup>> {
    let groups = UserGroupService::new(state.store.clone());
    Ok(Json(groups.remove_manager(&principal, &id, &user_id).await?))
}
