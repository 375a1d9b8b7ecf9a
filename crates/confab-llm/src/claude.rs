//! Anthropic messages-API adapter.
//!
//! Anthropic streams typed SSE events; the interesting ones here are
//! message_start (model + input tokens), content_block_delta (text), and
//! message_delta (output tokens + stop reason).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use confab_core::config::ClaudeConfig;

use crate::error::LlmError;
use crate::provider::{ChatRequest, GenerationStats, LlmProvider, Role};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    last_stats: Mutex<Option<GenerationStats>>,
}

impl ClaudeProvider {
    pub fn new(config: &ClaudeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            last_stats: Mutex::new(None),
        }
    }

    fn build_body(&self, req: &ChatRequest) -> serde_json::Value {
        // Anthropic takes the system prompt as a top-level field and only
        // accepts user/assistant turns in the messages array.
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": true,
        });
        if let Some(system) = &req.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn provider_name(&self) -> &str {
        "claude"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config("claude: api_key is required".to_string()));
        }
        if self.model.is_empty() {
            return Err(LlmError::Config("claude: model is required".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(LlmError::Config(
                "claude: max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.build_body(req);
        *self.last_stats.lock().unwrap() = None;

        debug!(model = %self.model, "starting Anthropic stream");

        let resp = self
            .client
            .post(format!("{}/v1/messages", ANTHROPIC_BASE_URL))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(LlmError::from_status(status, &text, &self.model));
        }

        let started = Instant::now();
        let mut model = self.model.clone();
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
        let mut current_event = String::new();
        let mut line_buf = String::new();

        use futures_util::StreamExt;
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let err: LlmError = e.into();
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return Ok(());
                }
            };

            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };

            line_buf.push_str(text);
            let lines: Vec<&str> = line_buf.split('\n').collect();
            let (complete, remainder) = lines.split_at(lines.len() - 1);
            let remainder = remainder.first().unwrap_or(&"").to_string();

            for line in complete {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_sse_line(line) {
                    Some(SseParsed::Event(ev)) => current_event = ev,
                    Some(SseParsed::Data(data)) => match current_event.as_str() {
                        "message_start" => {
                            if let Ok(start) = serde_json::from_str::<MessageStart>(&data) {
                                model = start.message.model;
                                prompt_tokens = start.message.usage.input_tokens;
                            }
                        }
                        "content_block_delta" => {
                            match serde_json::from_str::<ContentBlockDelta>(&data) {
                                Ok(delta) => {
                                    if delta.delta.delta_type == "text_delta" {
                                        if let Some(text) = delta.delta.text {
                                            if !text.is_empty()
                                                && tx
                                                    .send(StreamEvent::Delta { text })
                                                    .await
                                                    .is_err()
                                            {
                                                return Ok(());
                                            }
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!(err = %e, "bad Anthropic delta frame");
                                }
                            }
                        }
                        "message_delta" => {
                            if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                                completion_tokens = delta.usage.output_tokens;
                            }
                        }
                        "error" => {
                            warn!(data = %data, "Anthropic stream error");
                            let _ = tx.send(StreamEvent::Error { message: data }).await;
                            return Ok(());
                        }
                        // ping, content_block_start/stop, message_stop
                        _ => {}
                    },
                    None => {}
                }
            }

            line_buf = remainder;
        }

        let stats = GenerationStats::from_counts(
            prompt_tokens,
            completion_tokens,
            started.elapsed().as_secs_f64(),
            model,
        );
        *self.last_stats.lock().unwrap() = Some(stats.clone());
        let _ = tx.send(StreamEvent::Done { stats }).await;
        Ok(())
    }

    fn last_stats(&self) -> Option<GenerationStats> {
        self.last_stats.lock().unwrap().clone()
    }
}

// Anthropic SSE data types (deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(&ClaudeConfig {
            api_key: "sk-ant".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            timeout_secs: 60,
        })
    }

    #[test]
    fn system_prompt_is_top_level_not_a_message() {
        let req = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: "ignored".to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "hi".to_string(),
                },
            ],
            system_prompt: Some("be terse".to_string()),
            ..Default::default()
        };
        let body = provider().build_body(&req);
        assert_eq!(body["system"], "be terse");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn empty_key_is_a_config_error() {
        let p = ClaudeProvider::new(&ClaudeConfig {
            api_key: String::new(),
            model: "m".to_string(),
            max_tokens: 10,
            temperature: 0.5,
            timeout_secs: 60,
        });
        assert!(matches!(p.validate_config(), Err(LlmError::Config(_))));
    }
}
