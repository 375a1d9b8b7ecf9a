use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_llm::{ChatMessage, GenerationStats};

/// Conversation document. `is_shared` is derived from the share list and is
/// kept in step with it on every share/unshare so listings can filter on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    pub owner_id: String,
    /// Sidebar folder, when any. Kept in sync with
    /// `ConversationGroup.conversation_ids` (latest write wins).
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub shared_with_group_ids: Vec<String>,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sidebar folder, distinct from user groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGroup {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub conversation_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// The structured record of exactly what the model saw for one turn.
///
/// Stored on the user turn as well as the assistant turn so a retroactive
/// audit never depends on the assistant message having been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmContext {
    pub system: String,
    pub context: Vec<ChatMessage>,
    pub current_message: String,
}

/// Message document. Immutable after creation; chronological order within a
/// conversation is `created_at`, ties broken by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_full_prompt: Option<LlmContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_stats: Option<GenerationStats>,
}
