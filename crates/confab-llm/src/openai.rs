//! OpenAI chat-completions adapter.
//!
//! Also serves every OpenAI-compatible endpoint in the fleet: OpenRouter
//! (extra attribution headers) and Databricks serving endpoints (custom
//! base URL + `/invocations` path) reuse this adapter via `with_endpoint`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use confab_core::config::{DatabricksConfig, OpenAiConfig, OpenRouterConfig};

use crate::error::LlmError;
use crate::provider::{ChatRequest, GenerationStats, LlmProvider, Role};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

pub struct OpenAiProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    /// Path appended to base_url for chat completions.
    chat_path: String,
    /// Probe path for connect(); None skips the reachability check.
    models_path: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    /// Ask for usage on the final stream chunk. Not every compatible
    /// endpoint accepts stream_options, so it is opt-in per provider.
    include_usage: bool,
    extra_headers: Vec<(&'static str, String)>,
    last_stats: Mutex<Option<GenerationStats>>,
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self::with_endpoint(
            "openai",
            config.api_key.clone(),
            config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
            Some("/v1/models".to_string()),
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.timeout_secs,
            true,
            Vec::new(),
        )
    }

    pub fn openrouter(config: &OpenRouterConfig) -> Self {
        Self::with_endpoint(
            "openrouter",
            config.api_key.clone(),
            "https://openrouter.ai".to_string(),
            "/api/v1/chat/completions".to_string(),
            Some("/api/v1/models".to_string()),
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.timeout_secs,
            true,
            vec![
                ("HTTP-Referer", "https://github.com/confab".to_string()),
                ("X-Title", "Confab".to_string()),
            ],
        )
    }

    pub fn databricks(config: &DatabricksConfig) -> Self {
        Self::with_endpoint(
            "databricks",
            config.api_key.clone(),
            format!(
                "{}/serving-endpoints/{}",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            "/invocations".to_string(),
            None,
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.timeout_secs,
            false,
            Vec::new(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_endpoint(
        name: &str,
        api_key: String,
        base_url: String,
        chat_path: String,
        models_path: Option<String>,
        model: String,
        max_tokens: u32,
        temperature: f32,
        timeout_secs: u64,
        include_usage: bool,
        extra_headers: Vec<(&'static str, String)>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            provider_name: name.to_string(),
            api_key,
            base_url,
            chat_path,
            models_path,
            model,
            max_tokens,
            temperature,
            include_usage,
            extra_headers,
            last_stats: Mutex::new(None),
        }
    }

    fn build_body(&self, req: &ChatRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &req.messages {
            messages.push(serde_json::json!({"role": m.role, "content": m.content}));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": true,
        });
        if self.include_usage {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config(format!(
                "{}: api_key is required",
                self.provider_name
            )));
        }
        if self.model.is_empty() {
            return Err(LlmError::Config(format!(
                "{}: model is required",
                self.provider_name
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::Config(format!(
                "{}: temperature must be within 0..=2, got {}",
                self.provider_name, self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(LlmError::Config(format!(
                "{}: max_tokens must be positive",
                self.provider_name
            )));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), LlmError> {
        self.validate_config()?;
        let Some(models_path) = &self.models_path else {
            return Ok(());
        };
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, models_path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body, &self.model));
        }
        debug!(provider = %self.provider_name, "credentials validated");
        Ok(())
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.build_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);
        *self.last_stats.lock().unwrap() = None;

        debug!(provider = %self.provider_name, model = %self.model, "starting stream");

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json");
        for (name, value) in &self.extra_headers {
            request = request.header(*name, value);
        }
        let resp = request.json(&body).send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.provider_name, status, body = %text, "API error");
            return Err(LlmError::from_status(status, &text, &self.model));
        }

        let started = Instant::now();
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
        let mut line_buf = String::new();
        let mut done = false;

        use futures_util::StreamExt;
        let mut byte_stream = resp.bytes_stream();

        'stream: while let Some(chunk) = byte_stream.next().await {
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
                let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                    continue;
                };

                // The literal [DONE] sentinel terminates the sequence.
                if data.trim() == "[DONE]" {
                    done = true;
                    break 'stream;
                }

                match serde_json::from_str::<StreamChunk>(&data) {
                    Ok(parsed) => {
                        if let Some(usage) = &parsed.usage {
                            prompt_tokens = usage.prompt_tokens;
                            completion_tokens = usage.completion_tokens;
                        }
                        for choice in &parsed.choices {
                            if let Some(content) = &choice.delta.content {
                                if !content.is_empty()
                                    && tx
                                        .send(StreamEvent::Delta {
                                            text: content.clone(),
                                        })
                                        .await
                                        .is_err()
                                {
                                    // Receiver dropped: caller cancelled.
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Err(e) => {
                        // Malformed frames are skipped, never forwarded.
                        warn!(provider = %self.provider_name, err = %e, "bad stream frame");
                    }
                }
            }

            line_buf = remainder;
        }

        if !done {
            // Connection ended without the sentinel; still finalize with
            // whatever arrived; compatible endpoints vary here.
            debug!(provider = %self.provider_name, "stream ended without [DONE]");
        }

        let stats = GenerationStats::from_counts(
            prompt_tokens,
            completion_tokens,
            started.elapsed().as_secs_f64(),
            self.model.clone(),
        );
        *self.last_stats.lock().unwrap() = Some(stats.clone());
        let _ = tx.send(StreamEvent::Done { stats }).await;
        Ok(())
    }

    fn last_stats(&self) -> Option<GenerationStats> {
        self.last_stats.lock().unwrap().clone()
    }
}

// OpenAI streaming chunk types (deserialization only)

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn config() -> OpenAiConfig {
        OpenAiConfig {
            api_key: "sk-test".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            max_tokens: 256,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }

    #[test]
    fn body_prepends_system_prompt() {
        let provider = OpenAiProvider::new(&config());
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            system_prompt: Some("be terse".to_string()),
            ..Default::default()
        };
        let body = provider.build_body(&req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be terse");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn missing_api_key_fails_validation() {
        let mut cfg = config();
        cfg.api_key = String::new();
        let provider = OpenAiProvider::new(&cfg);
        assert!(matches!(
            provider.validate_config(),
            Err(LlmError::Config(_))
        ));
    }

    #[test]
    fn databricks_endpoint_targets_invocations() {
        let provider = OpenAiProvider::databricks(&DatabricksConfig {
            api_key: "dapi".to_string(),
            base_url: "https://ws.cloud.databricks.com".to_string(),
            model: "dbrx".to_string(),
            max_tokens: 100,
            temperature: 0.5,
            timeout_secs: 60,
        });
        assert_eq!(
            provider.base_url,
            "https://ws.cloud.databricks.com/serving-endpoints/dbrx"
        );
        assert_eq!(provider.chat_path, "/invocations");
        assert!(!provider.include_usage);
    }

    #[test]
    fn openrouter_carries_attribution_headers() {
        let provider = OpenAiProvider::openrouter(&OpenRouterConfig {
            api_key: "sk-or".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            max_tokens: 100,
            temperature: 0.5,
            timeout_secs: 60,
        });
        assert!(provider
            .extra_headers
            .iter()
            .any(|(name, _)| *name == "X-Title"));
    }
}
