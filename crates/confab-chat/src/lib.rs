//! Conversations, messages, sidebar folders, and the chat engine.

pub mod conversations;
pub mod engine;
pub mod groups;
pub mod messages;
pub mod types;

pub use engine::{ChatEngine, ChatEvent, ConfigProviderFactory, ProviderFactory};
pub use types::{Conversation, ConversationGroup, LlmContext, Message, MessageRole};
