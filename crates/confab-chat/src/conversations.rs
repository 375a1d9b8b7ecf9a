//! Conversation repository + service: ownership, sharing, cascades.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use confab_core::policy;
use confab_core::types::Principal;
use confab_core::{ApiError, Result};
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::groups::{ConversationGroupService, CONVERSATION_GROUPS};
use crate::messages::MessageRepo;
use crate::types::{Conversation, Message};

pub const CONVERSATIONS: &str = "conversations";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub title: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    /// Some(None) detaches the conversation from its folder; absent leaves
    /// it untouched.
    #[serde(default, with = "double_option")]
    pub group_id: Option<Option<String>>,
}

/// Distinguish "field absent" from "field: null" in JSON patches.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(de).map(Some)
    }
}

pub struct ConversationService {
    store: Arc<dyn DocumentStore>,
    messages: MessageRepo,
}

impl ConversationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            messages: MessageRepo::new(store.clone()),
            store,
        }
    }

    // ── repository ────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        match self.store.get_by_id(CONVERSATIONS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: &str) -> Result<Conversation> {
        self.get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("conversation {} not found", id)))
    }

    fn check_read(&self, conversation: &Conversation, caller: &Principal) -> Result<()> {
        if policy::can_read_conversation(
            caller,
            &conversation.owner_id,
            &conversation.shared_with_group_ids,
        ) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "access denied to this conversation".to_string(),
            ))
        }
    }

    fn check_owner(&self, conversation: &Conversation, caller: &Principal) -> Result<()> {
        if policy::can_modify_conversation(caller, &conversation.owner_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "only the conversation owner can perform this action".to_string(),
            ))
        }
    }

    // ── operations ────────────────────────────────────────────────────────────

    pub async fn create(
        &self,
        caller: &Principal,
        req: CreateConversationRequest,
    ) -> Result<Conversation> {
        if req.title.trim().is_empty() {
            return Err(ApiError::BadRequest("title must not be empty".to_string()));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: String::new(),
            title: req.title,
            owner_id: caller.id.clone(),
            group_id: None,
            shared_with_group_ids: Vec::new(),
            is_shared: false,
            message_count: 0,
            created_at: now,
            updated_at: now,
        };
        let doc = self
            .store
            .create(CONVERSATIONS, serde_json::to_value(&conversation)?)
            .await?;
        let mut created: Conversation = serde_json::from_value(doc)?;

        // Attaching at creation goes through the same sync path as a later
        // move so the folder's list stays consistent.
        if let Some(group_id) = req.group_id {
            created = self.move_to_group(caller, &created.id, Some(group_id)).await?;
        }
        info!(conversation_id = %created.id, "conversation created");
        Ok(created)
    }

    pub async fn get_checked(&self, caller: &Principal, id: &str) -> Result<Conversation> {
        let conversation = self.require(id).await?;
        self.check_read(&conversation, caller)?;
        Ok(conversation)
    }

    /// The caller's own conversations, most recently touched first.
    pub async fn list_own(&self, caller: &Principal) -> Result<Vec<Conversation>> {
        let docs = self
            .store
            .query(
                CONVERSATIONS,
                &[Filter::eq("owner_id", caller.id.as_str())],
                Page::new(0, 1000),
                &[SortKey::desc("updated_at")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    /// Conversations shared with any group the caller belongs to. The share
    /// flag narrows the scan; the group intersection happens here since the
    /// store only speaks equality filters.
    pub async fn list_shared_with(&self, caller: &Principal) -> Result<Vec<Conversation>> {
        if caller.group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self
            .store
            .query(
                CONVERSATIONS,
                &[Filter::eq("is_shared", true)],
                Page::new(0, 1000),
                &[SortKey::desc("updated_at")],
            )
            .await?;
        let mut out = Vec::new();
        for doc in docs {
            let conversation: Conversation = serde_json::from_value(doc)?;
            if conversation.owner_id != caller.id
                && caller
                    .group_ids
                    .iter()
                    .any(|g| conversation.shared_with_group_ids.contains(g))
            {
                out.push(conversation);
            }
        }
        Ok(out)
    }

    pub async fn update(
        &self,
        caller: &Principal,
        id: &str,
        req: UpdateConversationRequest,
    ) -> Result<Conversation> {
        let conversation = self.require(id).await?;
        self.check_owner(&conversation, caller)?;

        if let Some(title) = req.title {
            if title.trim().is_empty() {
                return Err(ApiError::BadRequest("title must not be empty".to_string()));
            }
            self.store
                .update(
                    CONVERSATIONS,
                    id,
                    serde_json::json!({"title": title, "updated_at": Utc::now()}),
                )
                .await?;
        }
        if let Some(group_id) = req.group_id {
            return self.move_to_group(caller, id, group_id).await;
        }
        self.require(id).await
    }

    pub async fn delete(&self, caller: &Principal, id: &str) -> Result<()> {
        let conversation = self.require(id).await?;
        self.check_owner(&conversation, caller)?;

        // Cascade: messages go with the conversation; the sidebar folder
        // keeps its other entries.
        let removed = self.messages.delete_for_conversation(id).await?;
        if let Some(group_id) = &conversation.group_id {
            self.detach_from_group_doc(group_id, id).await?;
        }
        self.store.delete(CONVERSATIONS, id).await?;
        info!(conversation_id = id, messages = removed, "conversation deleted");
        Ok(())
    }

    /// Replace the share list (owner only).
    pub async fn share(
        &self,
        caller: &Principal,
        id: &str,
        group_ids: Vec<String>,
    ) -> Result<Conversation> {
        let conversation = self.require(id).await?;
        self.check_owner(&conversation, caller)?;
        let is_shared = !group_ids.is_empty();
        let doc = self
            .store
            .update(
                CONVERSATIONS,
                id,
                serde_json::json!({
                    "shared_with_group_ids": group_ids,
                    "is_shared": is_shared,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Remove the given groups from the share list (owner only).
    pub async fn unshare(
        &self,
        caller: &Principal,
        id: &str,
        group_ids: Vec<String>,
    ) -> Result<Conversation> {
        let conversation = self.require(id).await?;
        self.check_owner(&conversation, caller)?;
        let remaining: Vec<String> = conversation
            .shared_with_group_ids
            .into_iter()
            .filter(|g| !group_ids.contains(g))
            .collect();
        let is_shared = !remaining.is_empty();
        let doc = self
            .store
            .update(
                CONVERSATIONS,
                id,
                serde_json::json!({
                    "shared_with_group_ids": remaining,
                    "is_shared": is_shared,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Message history, oldest first. Shared readers see it too.
    pub async fn list_messages(
        &self,
        caller: &Principal,
        conversation_id: &str,
        page: Page,
    ) -> Result<Vec<Message>> {
        let conversation = self.require(conversation_id).await?;
        self.check_read(&conversation, caller)?;
        self.messages.list(conversation_id, page).await
    }

    // ── folder sync ───────────────────────────────────────────────────────────

    /// Move a conversation between sidebar folders, keeping both sides of
    /// the denormalization in step. Latest write wins: the conversation is
    /// pulled out of any prior folder first.
    pub async fn move_to_group(
        &self,
        caller: &Principal,
        conversation_id: &str,
        group_id: Option<String>,
    ) -> Result<Conversation> {
        let conversation = self.require(conversation_id).await?;
        self.check_owner(&conversation, caller)?;

        if let Some(target) = &group_id {
            let groups = ConversationGroupService::new(self.store.clone());
            let group = groups.get_checked(caller, target).await?;
            if !group.conversation_ids.iter().any(|c| c == conversation_id) {
                let mut ids = group.conversation_ids;
                ids.push(conversation_id.to_string());
                self.store
                    .update(
                        CONVERSATION_GROUPS,
                        target,
                        serde_json::json!({"conversation_ids": ids}),
                    )
                    .await?;
            }
        }
        if let Some(prior) = &conversation.group_id {
            if group_id.as_deref() != Some(prior.as_str()) {
                self.detach_from_group_doc(prior, conversation_id).await?;
            }
        }

        let doc = self
            .store
            .update(
                CONVERSATIONS,
                conversation_id,
                serde_json::json!({"group_id": group_id, "updated_at": Utc::now()}),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn detach_from_group_doc(&self, group_id: &str, conversation_id: &str) -> Result<()> {
        // A dangling folder id is membership-absent, not an error.
        let Some(doc) = self.store.get_by_id(CONVERSATION_GROUPS, group_id).await? else {
            return Ok(());
        };
        let group: crate::types::ConversationGroup = serde_json::from_value(doc)?;
        let ids: Vec<String> = group
            .conversation_ids
            .into_iter()
            .filter(|c| c != conversation_id)
            .collect();
        self.store
            .update(
                CONVERSATION_GROUPS,
                group_id,
                serde_json::json!({"conversation_ids": ids}),
            )
            .await?;
        Ok(())
    }
}
