//! User administration endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use confab_core::types::{AccountStatus, UserRole};
use confab_users::users::{CreateUserRequest, UpdateUserRequest, UserListFilter, UserService};
use confab_users::PublicUser;

use crate::app::AppState;
use crate::error::HttpResult;
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
    pub role: Option<UserRole>,
    pub status: Option<AccountStatus>,
}

/// GET /users: manager+ only.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Query(params): Query<ListParams>,
) -> HttpResult<Json<Vec<PublicUser>>> {
    let users = UserService::new(state.store.clone());
    let listed = users
        .list_users(
            &principal,
            UserListFilter {
                role: params.role,
                status: params.status,
                skip: params.skip,
                limit: params.limit,
            },
        )
        .await?;
    Ok(Json(listed))
}

/// POST /users: root only.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<CreateUserRequest>,
) -> HttpResult<(StatusCode, Json<PublicUser>)> {
    let users = UserService::new(state.store.clone());
    let created = users.create_user(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /users/{id}: self or manager+.
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<Json<PublicUser>> {
    let users = UserService::new(state.store.clone());
    Ok(Json(users.get_user(&principal, &id).await?))
}

/// PUT /users/{id}: self for basic fields, manager+ for role/status.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> HttpResult<Json<PublicUser>> {
    let users = UserService::new(state.store.clone());
    Ok(Json(users.update_user(&principal, &id, req).await?))
}

/// DELETE /users/{id}: root only, never self.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let users = UserService::new(state.store.clone());
    users.delete_user(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
