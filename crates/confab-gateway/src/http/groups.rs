//! Sidebar-folder endpoints (conversation groups).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use confab_chat::conversations::ConversationService;
use confab_chat::groups::ConversationGroupService;
use confab_chat::ConversationGroup;

use crate::app::AppState;
use crate::error::HttpResult;
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct FolderRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddConversationRequest {
    pub conversation_id: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<Vec<ConversationGroup>>> {
    let groups = ConversationGroupService::new(state.store.clone());
    Ok(Json(groups.list(&principal).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<FolderRequest>,
) -> HttpResult<(StatusCode, Json<ConversationGroup>)> {
    let groups = ConversationGroupService::new(state.store.clone());
    let created = groups.create(&principal, &req.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<Json<ConversationGroup>> {
    let groups = ConversationGroupService::new(state.store.clone());
    Ok(Json(groups.get_checked(&principal, &id).await?))
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<FolderRequest>,
) -> HttpResult<Json<ConversationGroup>> {
    let groups = ConversationGroupService::new(state.store.clone());
    Ok(Json(groups.rename(&principal, &id, &req.name).await?))
}

/// DELETE /groups/{id}: conversations inside are detached, not deleted.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let groups = ConversationGroupService::new(state.store.clone());
    groups.delete(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /groups/{id}/conversations: move a conversation into this folder
/// (latest write wins).
pub async fn add_conversation(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<AddConversationRequest>,
) -> HttpResult<Json<ConversationGroup>> {
    let conversations = ConversationService::new(state.store.clone());
    conversations
        .move_to_group(&principal, &req.conversation_id, Some(id.clone()))
        .await?;
    let groups = ConversationGroupService::new(state.store.clone());
    Ok(Json(groups.get_checked(&principal, &id).await?))
}

pub async fn remove_conversation(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path((id, conversation_id)): Path<(String, String)>,
) -> HttpResult<Json<ConversationGroup>> {
    let conversations = ConversationService::new(state.store.clone());
    conversations
        .move_to_group(&principal, &conversation_id, None)
        .await?;
    let groups = ConversationGroupService::new(state.store.clone());
    Ok(Json(groups.get_checked(&principal, &id).await?))
}
