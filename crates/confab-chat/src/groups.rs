//! Sidebar folders for organizing conversations. Owner-private; deleting a
//! folder never deletes the conversations inside it.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use confab_core::types::Principal;
use confab_core::{ApiError, Result};
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::conversations::CONVERSATIONS;
use crate::types::ConversationGroup;

pub const CONVERSATION_GROUPS: &str = "conversation_groups";

pub struct ConversationGroupService {
    store: Arc<dyn DocumentStore>,
}

impl ConversationGroupService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn require(&self, id: &str) -> Result<ConversationGroup> {
        match self.store.get_by_id(CONVERSATION_GROUPS, id).await? {
            Some(doc) => Ok(serde_json::from_value(doc)?),
            None => Err(ApiError::NotFound("group not found".to_string())),
        }
    }

    pub async fn get_checked(&self, caller: &Principal, id: &str) -> Result<ConversationGroup> {
        let group = self.require(id).await?;
        if group.owner_id != caller.id {
            return Err(ApiError::Forbidden(
                "only the group owner can access this group".to_string(),
            ));
        }
        Ok(group)
    }

    pub async fn list(&self, caller: &Principal) -> Result<Vec<ConversationGroup>> {
        let docs = self
            .store
            .query(
                CONVERSATION_GROUPS,
                &[Filter::eq("owner_id", caller.id.as_str())],
                Page::new(0, 1000),
                &[SortKey::asc("created_at")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    pub async fn create(&self, caller: &Principal, name: &str) -> Result<ConversationGroup> {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("group name must not be empty".to_string()));
        }
        let group = ConversationGroup {
            id: String::new(),
            name: name.to_string(),
            owner_id: caller.id.clone(),
            conversation_ids: Vec::new(),
            created_at: Utc::now(),
        };
        let doc = self
            .store
            .create(CONVERSATION_GROUPS, serde_json::to_value(&group)?)
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn rename(
        &self,
        caller: &Principal,
        id: &str,
        name: &str,
    ) -> Result<ConversationGroup> {
        self.get_checked(caller, id).await?;
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("group name must not be empty".to_string()));
        }
        let doc = self
            .store
            .update(CONVERSATION_GROUPS, id, serde_json::json!({"name": name}))
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Delete the folder; contained conversations survive with
    /// `group_id = null`.
    pub async fn delete(&self, caller: &Principal, id: &str) -> Result<()> {
        let group = self.get_checked(caller, id).await?;
        for conversation_id in &group.conversation_ids {
            if self
                .store
                .get_by_id(CONVERSATIONS, conversation_id)
                .await?
                .is_some()
            {
                self.store
                    .update(
                        CONVERSATIONS,
                        conversation_id,
                        serde_json::json!({"group_id": null}),
                    )
                    .await?;
            }
        }
        self.store.delete(CONVERSATION_GROUPS, id).await?;
        info!(group_id = id, "conversation group deleted");
        Ok(())
    }
}
