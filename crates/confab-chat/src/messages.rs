//! Message repository. Messages are append-only; there is no update path.

use std::sync::Arc;

use confab_core::Result;
use confab_llm::{ChatMessage, Role};
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::types::{Message, MessageRole};

pub const MESSAGES: &str = "messages";

pub struct MessageRepo {
    store: Arc<dyn DocumentStore>,
}

impl MessageRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, message: &Message) -> Result<Message> {
        let doc = self
            .store
            .create(MESSAGES, serde_json::to_value(message)?)
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Messages of a conversation in chronological order.
    pub async fn list(&self, conversation_id: &str, page: Page) -> Result<Vec<Message>> {
        let docs = self
            .store
            .query(
                MESSAGES,
                &[Filter::eq("conversation_id", conversation_id)],
                page,
                &[SortKey::asc("created_at")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    /// The last `limit` messages in chronological order: query newest-first,
    /// then reverse.
    pub async fn recent(&self, conversation_id: &str, limit: u64) -> Result<Vec<Message>> {
        let docs = self
            .store
            .query(
                MESSAGES,
                &[Filter::eq("conversation_id", conversation_id)],
                Page::first(limit),
                &[SortKey::desc("created_at")],
            )
            .await?;
        let mut messages: Vec<Message> = docs
            .into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn count(&self, conversation_id: &str) -> Result<u64> {
        Ok(self
            .store
            .count(MESSAGES, &[Filter::eq("conversation_id", conversation_id)])
            .await?)
    }

    /// Cascade target for conversation deletion.
    pub async fn delete_for_conversation(&self, conversation_id: &str) -> Result<u64> {
        let mut removed = 0;
        loop {
            let batch = self
                .store
                .query(
                    MESSAGES,
                    &[Filter::eq("conversation_id", conversation_id)],
                    Page::first(500),
                    &[],
                )
                .await?;
            if batch.is_empty() {
                break;
            }
            for doc in &batch {
                if let Some(id) = doc.get("id").and_then(|v| v.as_str()) {
                    if self.store.delete(MESSAGES, id).await? {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Project stored messages into the wire shape providers accept.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage {
            role: match m.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            },
            content: m.content.clone(),
        })
        .collect()
}
