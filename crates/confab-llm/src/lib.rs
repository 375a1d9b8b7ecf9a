//! Uniform streaming interface over LLM provider back-ends.
//!
//! Adapters stream chunks into a caller-supplied bounded channel; a
//! capacity-1 channel gives the one-pending-chunk backpressure the chat
//! engine relies on. Statistics of the most recent completed stream are
//! kept on the adapter instance.

pub mod claude;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod stream;

pub use error::LlmError;
pub use factory::build_provider;
pub use provider::{ChatMessage, ChatRequest, GenerationStats, LlmProvider, Role};
pub use stream::StreamEvent;
