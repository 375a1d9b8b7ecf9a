//! Provider construction from configuration.
//!
//! The chat engine builds a fresh adapter per turn so `last_stats` is
//! confined to a single stream; construction is cheap (an HTTP client and
//! a few strings).

use std::sync::Arc;

use confab_core::config::{LlmConfig, LlmProviderKind, OllamaConfig};

use crate::claude::ClaudeProvider;
use crate::error::LlmError;
use crate::gemini::GeminiProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::provider::LlmProvider;

pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let missing = |section: &str| {
        LlmError::Config(format!("llm.provider = {section} but [llm.{section}] is not configured"))
    };

    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmProviderKind::Openai => {
            let cfg = config.openai.as_ref().ok_or_else(|| missing("openai"))?;
            Arc::new(OpenAiProvider::new(cfg))
        }
        LlmProviderKind::Claude => {
            let cfg = config.claude.as_ref().ok_or_else(|| missing("claude"))?;
            Arc::new(ClaudeProvider::new(cfg))
        }
        LlmProviderKind::Gemini => {
            let cfg = config.gemini.as_ref().ok_or_else(|| missing("gemini"))?;
            Arc::new(GeminiProvider::new(cfg))
        }
        LlmProviderKind::Databricks => {
            let cfg = config
                .databricks
                .as_ref()
                .ok_or_else(|| missing("databricks"))?;
            Arc::new(OpenAiProvider::databricks(cfg))
        }
        LlmProviderKind::Openrouter => {
            let cfg = config
                .openrouter
                .as_ref()
                .ok_or_else(|| missing("openrouter"))?;
            Arc::new(OpenAiProvider::openrouter(cfg))
        }
        LlmProviderKind::Ollama => {
            let default;
            let cfg = match &config.ollama {
                Some(cfg) => cfg,
                None => {
                    default = OllamaConfig::default();
                    &default
                }
            };
            Arc::new(OllamaProvider::new(cfg))
        }
    };

    provider.validate_config()?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::config::OpenRouterConfig;

    #[test]
    fn ollama_builds_without_a_section() {
        let config = LlmConfig {
            provider: LlmProviderKind::Ollama,
            ..Default::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
    }

    #[test]
    fn missing_section_is_a_config_error() {
        let config = LlmConfig {
            provider: LlmProviderKind::Claude,
            ..Default::default()
        };
        assert!(matches!(build_provider(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn empty_openrouter_key_fails_validation() {
        let config = LlmConfig {
            provider: LlmProviderKind::Openrouter,
            openrouter: Some(OpenRouterConfig {
                api_key: String::new(),
                model: "openai/gpt-4o-mini".to_string(),
                max_tokens: 100,
                temperature: 0.7,
                timeout_secs: 60,
            }),
            ..Default::default()
        };
        assert!(matches!(build_provider(&config), Err(LlmError::Config(_))));
    }
}
