use confab_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("streaming failed: {0}")]
    Streaming(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("provider configuration invalid: {0}")]
    Config(String),
}

impl LlmError {
    /// Map a provider HTTP status (plus response body) into an error kind.
    /// 400 responses hinting at prompt size become `ContextLength`.
    pub fn from_status(status: u16, body: &str, model: &str) -> Self {
        match status {
            401 => LlmError::Authentication("invalid API key".to_string()),
            404 => LlmError::ModelNotFound(model.to_string()),
            429 => LlmError::RateLimit("rate limit exceeded".to_string()),
            400 => {
                let lower = body.to_ascii_lowercase();
                if lower.contains("context_length") || lower.contains("token limit") {
                    LlmError::ContextLength(body.to_string())
                } else {
                    LlmError::InvalidRequest(body.to_string())
                }
            }
            s if s >= 500 => LlmError::Streaming(format!("server error {}: {}", s, body)),
            s => LlmError::Streaming(format!("unexpected status {}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else if err.is_connect() {
            LlmError::Connection(err.to_string())
        } else {
            LlmError::Streaming(err.to_string())
        }
    }
}

/// Pre-stream surfacing policy: provider credential or model problems are
/// the operator's fault, not the caller's, so they land on 500; rate limits
/// and oversized prompts pass through as caller-visible statuses.
impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimit(msg) => ApiError::TooManyRequests(msg),
            LlmError::ContextLength(msg) => ApiError::UnprocessableEntity(msg),
            LlmError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            LlmError::Timeout(msg) | LlmError::Connection(msg) => {
                ApiError::ServiceUnavailable(msg)
            }
            LlmError::Authentication(msg)
            | LlmError::ModelNotFound(msg)
            | LlmError::Streaming(msg)
            | LlmError::Config(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert!(matches!(
            LlmError::from_status(401, "", "m"),
            LlmError::Authentication(_)
        ));
        assert!(matches!(
            LlmError::from_status(404, "", "m"),
            LlmError::ModelNotFound(_)
        ));
        assert!(matches!(
            LlmError::from_status(429, "", "m"),
            LlmError::RateLimit(_)
        ));
        assert!(matches!(
            LlmError::from_status(400, "context_length_exceeded", "m"),
            LlmError::ContextLength(_)
        ));
        assert!(matches!(
            LlmError::from_status(400, "bad field", "m"),
            LlmError::InvalidRequest(_)
        ));
        assert!(matches!(
            LlmError::from_status(503, "", "m"),
            LlmError::Streaming(_)
        ));
    }
}
