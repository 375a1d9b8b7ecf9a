use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LlmError;
use crate::stream::StreamEvent;

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Request to an LLM provider. Sampling fields fall back to the adapter's
/// configured defaults when unset.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Statistics of one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub total_duration_s: f64,
    pub tokens_per_second: f64,
    pub model: String,
}

impl GenerationStats {
    /// Derive totals and throughput from raw counts and wall time.
    pub fn from_counts(
        prompt_tokens: u32,
        completion_tokens: u32,
        duration_s: f64,
        model: impl Into<String>,
    ) -> Self {
        let tokens_per_second = if duration_s > 0.0 {
            completion_tokens as f64 / duration_s
        } else {
            0.0
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            total_duration_s: duration_s,
            tokens_per_second,
            model: model.into(),
        }
    }
}

/// Common interface for all LLM providers.
///
/// The chunk sequence is finite, non-restartable, and cancellable: dropping
/// the receiving side makes the next `tx.send` fail, at which point the
/// adapter must return and release the underlying connection. Adapters never
/// buffer the whole response.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Cheap static validation of the adapter's configuration.
    fn validate_config(&self) -> Result<(), LlmError>;

    /// Validate credentials/reachability. Providers without a cheap probe
    /// return Ok and fail on the first real request instead.
    async fn connect(&self) -> Result<(), LlmError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// Stream a chat completion into `tx`.
    ///
    /// Errors before the first chunk are returned; mid-stream failures are
    /// emitted as `StreamEvent::Error`. A successful run terminates with
    /// `StreamEvent::Done` and records the run's statistics on the adapter.
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Statistics of the most recent completed stream on this instance;
    /// None before the first successful run.
    fn last_stats(&self) -> Option<GenerationStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_derivation() {
        let stats = GenerationStats::from_counts(10, 40, 2.0, "m");
        assert_eq!(stats.total_tokens, 50);
        assert!((stats.tokens_per_second - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_duration_does_not_divide() {
        let stats = GenerationStats::from_counts(1, 1, 0.0, "m");
        assert_eq!(stats.tokens_per_second, 0.0);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }
}
