//! Conversation CRUD, sharing, and message history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_chat::conversations::{
    ConversationService, CreateConversationRequest, UpdateConversationRequest,
};
use confab_chat::{Conversation, Message, MessageRole};
use confab_store::Page;

use crate::app::AppState;
use crate::error::HttpResult;
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct ShareRequest {
    pub group_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    100
}

/// Message projection for API responses: the provenance fields
/// (llm_full_prompt, raw response, stats) stay server-side.
#[derive(Serialize)]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<Vec<Conversation>>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(conversations.list_own(&principal).await?))
}

/// GET /conversations/shared: conversations shared with the caller's
/// groups.
pub async fn list_shared(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
) -> HttpResult<Json<Vec<Conversation>>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(conversations.list_shared_with(&principal).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<CreateConversationRequest>,
) -> HttpResult<(StatusCode, Json<Conversation>)> {
    let conversations = ConversationService::new(state.store.clone());
    let created = conversations.create(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<Json<Conversation>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(conversations.get_checked(&principal, &id).await?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<UpdateConversationRequest>,
) -> HttpResult<Json<Conversation>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(conversations.update(&principal, &id, req).await?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let conversations = ConversationService::new(state.store.clone());
    conversations.delete(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> HttpResult<Json<Conversation>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(conversations.share(&principal, &id, req.group_ids).await?))
}

pub async fn unshare(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> HttpResult<Json<Conversation>> {
    let conversations = ConversationService::new(state.store.clone());
    Ok(Json(
        conversations.unshare(&principal, &id, req.group_ids).await?,
    ))
}

/// GET /conversations/{id}/messages: oldest first; shared readers allowed.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Query(page): Query<PageParams>,
) -> HttpResult<Json<Vec<MessageView>>> {
    let conversations = ConversationService::new(state.store.clone());
    let listed = conversations
        .list_messages(&principal, &id, Page::new(page.skip, page.limit))
        .await?;
    Ok(Json(listed.into_iter().map(MessageView::from).collect()))
}
