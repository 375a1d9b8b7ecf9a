//! Ollama adapter for local inference.
//!
//! Streaming is newline-delimited JSON rather than SSE; the final frame
//! (`done: true`) carries token counts and nanosecond durations. The
//! adapter additionally manages the local model registry (list + pull).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confab_core::config::OllamaConfig;

use crate::error::LlmError;
use crate::provider::{ChatMessage, ChatRequest, GenerationStats, LlmProvider, Role};
use crate::stream::StreamEvent;

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    last_stats: Mutex<Option<GenerationStats>>,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
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
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": {
                "temperature": req.temperature.unwrap_or(self.temperature),
                "num_predict": req.max_tokens.unwrap_or(self.max_tokens),
            },
        })
    }

    /// Names of the models currently present in the local registry.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &text, &self.model));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Streaming(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Pull a model from the registry, consuming the streamed progress.
    ///
    /// Ollama can report a finished pull before the model is visible in
    /// /api/tags, so success is only declared after the registry confirms
    /// the model.
    pub async fn pull_model(&self, model_name: &str) -> Result<(), LlmError> {
        info!(model = model_name, "pulling model");
        let resp = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({"name": model_name, "stream": true}))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &text, model_name));
        }

        let mut line_buf = String::new();
        use futures_util::StreamExt;
        let mut byte_stream = resp.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(LlmError::from)?;
            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
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
                if let Ok(progress) = serde_json::from_str::<PullProgress>(line) {
                    if let Some(err) = progress.error {
                        return Err(LlmError::Streaming(format!("pull failed: {}", err)));
                    }
                    if let Some(state) = progress.status {
                        debug!(model = model_name, status = %state, "pull progress");
                    }
                }
            }
            line_buf = remainder;
        }

        // Registry visibility lags pull completion.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let models = self.list_models().await?;
        let found = models
            .iter()
            .any(|m| m.contains(model_name) || model_name.contains(m.as_str()));
        if !found {
            return Err(LlmError::Streaming(format!(
                "model '{}' pulled but missing from registry (have: {:?})",
                model_name, models
            )));
        }
        info!(model = model_name, "model pulled and verified");
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<(), LlmError> {
        if self.base_url.is_empty() {
            return Err(LlmError::Config("ollama: base_url is required".to_string()));
        }
        if self.model.is_empty() {
            return Err(LlmError::Config("ollama: model is required".to_string()));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), LlmError> {
        self.validate_config()?;
        self.list_models().await.map(|_| ())
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.build_body(req);
        *self.last_stats.lock().unwrap() = None;

        debug!(model = %self.model, "starting Ollama stream");

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(LlmError::from_status(status, &text, &self.model));
        }

        let mut model = self.model.clone();
        let mut stats: Option<GenerationStats> = None;
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
                match serde_json::from_str::<NdjsonChunk>(line) {
                    Ok(frame) => {
                        if model.is_empty() {
                            model = frame.model.clone();
                        }
                        if frame.done {
                            // Terminal frame: token counts and nanosecond timings.
                            let prompt_tokens = frame.prompt_eval_count.unwrap_or(0);
                            let completion_tokens = frame.eval_count.unwrap_or(0);
                            let total_s =
                                frame.total_duration.unwrap_or(0) as f64 / 1_000_000_000.0;
                            let eval_s = frame.eval_duration.unwrap_or(0) as f64 / 1_000_000_000.0;
                            let mut s = GenerationStats::from_counts(
                                prompt_tokens,
                                completion_tokens,
                                total_s,
                                frame.model.clone(),
                            );
                            if eval_s > 0.0 {
                                s.tokens_per_second = completion_tokens as f64 / eval_s;
                            }
                            stats = Some(s);
                        } else if !frame.message.content.is_empty()
                            && tx
                                .send(StreamEvent::Delta {
                                    text: frame.message.content,
                                })
                                .await
                                .is_err()
                        {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(err = %e, "bad Ollama stream frame");
                    }
                }
            }

            line_buf = remainder;
        }

        let stats = stats.unwrap_or_else(|| GenerationStats::from_counts(0, 0, 0.0, model));
        *self.last_stats.lock().unwrap() = Some(stats.clone());
        let _ = tx.send(StreamEvent::Done { stats }).await;
        Ok(())
    }

    fn last_stats(&self) -> Option<GenerationStats> {
        self.last_stats.lock().unwrap().clone()
    }
}

// Ollama API response types (deserialization only)

#[derive(Deserialize)]
struct NdjsonChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: OllamaMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    total_duration: Option<u64>,
    eval_duration: Option<u64>,
}

#[derive(Deserialize, Default)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Deserialize)]
struct PullProgress {
    status: Option<String>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OllamaProvider {
        OllamaProvider::new(&OllamaConfig::default())
    }

    #[test]
    fn body_carries_num_predict_and_temperature() {
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            system_prompt: Some("sys".to_string()),
            temperature: Some(0.2),
            max_tokens: Some(64),
        };
        let body = provider().build_body(&req);
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn terminal_frame_parses_stats() {
        let line = r#"{"model":"tinyllama","message":{"content":""},"done":true,
            "prompt_eval_count":15,"eval_count":42,
            "total_duration":2500000000,"eval_duration":2000000000}"#;
        let frame: NdjsonChunk = serde_json::from_str(line).unwrap();
        assert!(frame.done);
        assert_eq!(frame.prompt_eval_count, Some(15));
        assert_eq!(frame.eval_count, Some(42));
    }
}
