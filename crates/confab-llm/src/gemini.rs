//! Google Gemini adapter (generativelanguage API, SSE streaming).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use confab_core::config::GeminiConfig;

use crate::error::LlmError;
use crate::provider::{ChatRequest, GenerationStats, LlmProvider, Role};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    last_stats: Mutex<Option<GenerationStats>>,
}

impl GeminiProvider {
    pub fn new(config: &GeminiConfig) -> Self {
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
        // Gemini's roles are "user" and "model"; the system prompt rides in
        // a dedicated systemInstruction block.
        let contents: Vec<serde_json::Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens.unwrap_or(self.max_tokens),
                "temperature": req.temperature.unwrap_or(self.temperature),
            }
        });
        if let Some(system) = &req.system_prompt {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config("gemini: api_key is required".to_string()));
        }
        if self.model.is_empty() {
            return Err(LlmError::Config("gemini: model is required".to_string()));
        }
        Ok(())
    }

    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.build_body(req);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            GEMINI_BASE_URL, self.model
        );
        *self.last_stats.lock().unwrap() = None;

        debug!(model = %self.model, "starting Gemini stream");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(LlmError::from_status(status, &text, &self.model));
        }

        let started = Instant::now();
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
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
                let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                    continue;
                };
                match serde_json::from_str::<GeminiChunk>(&data) {
                    Ok(parsed) => {
                        if let Some(usage) = &parsed.usage_metadata {
                            prompt_tokens = usage.prompt_token_count.unwrap_or(0);
                            completion_tokens = usage.candidates_token_count.unwrap_or(0);
                        }
                        for candidate in &parsed.candidates {
                            for part in &candidate.content.parts {
                                if let Some(text) = &part.text {
                                    if !text.is_empty()
                                        && tx
                                            .send(StreamEvent::Delta { text: text.clone() })
                                            .await
                                            .is_err()
                                    {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(err = %e, "bad Gemini stream frame");
                    }
                }
            }

            line_buf = remainder;
        }

        // Gemini has no explicit end sentinel: the SSE body just closes
        // after the final usage-bearing frame.
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

// Gemini streaming chunk types (deserialization only)

#[derive(Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    #[test]
    fn assistant_turns_map_to_model_role() {
        let provider = GeminiProvider::new(&GeminiConfig {
            api_key: "key".to_string(),
            model: "gemini-1.5-pro".to_string(),
            max_tokens: 100,
            temperature: 0.7,
            timeout_secs: 60,
        });
        let req = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: Role::User,
                    content: "hi".to_string(),
                },
                ChatMessage {
                    role: Role::Assistant,
                    content: "hello".to_string(),
                },
            ],
            system_prompt: Some("sys".to_string()),
            ..Default::default()
        };
        let body = provider.build_body(&req);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
    }
}
