use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8180;
pub const DEFAULT_BIND: &str = "0.0.0.0";
/// Hard cap on a single uploaded file.
pub const MAX_FILE_SIZE_BYTES: usize = 50 * 1024 * 1024;
/// Presigned download links stay valid for a week unless overridden.
pub const PRESIGNED_URL_TTL_SECS: u64 = 7 * 24 * 3600;

/// Top-level config (confab.toml + CONFAB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfabConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub objstore: ObjectStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    #[default]
    Local,
    Sso,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// HS256 signing secret for bearer tokens (local mode).
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: u64,
    /// SSO trust headers. The token header is logged, never validated;
    /// the trust boundary is the upstream gateway.
    #[serde(default = "default_sso_token_header")]
    pub sso_token_header: String,
    #[serde(default = "default_sso_name_header")]
    pub sso_name_header: String,
    #[serde(default = "default_sso_email_header")]
    pub sso_email_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Local,
            token_secret: default_token_secret(),
            token_expiry_hours: default_token_expiry_hours(),
            sso_token_header: default_sso_token_header(),
            sso_name_header: default_sso_name_header(),
            sso_email_header: default_sso_email_header(),
        }
    }
}

/// Initial root principal, created at startup when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_root_email")]
    pub root_email: String,
    #[serde(default = "default_root_password")]
    pub root_password: String,
    #[serde(default = "default_root_name")]
    pub root_name: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            root_email: default_root_email(),
            root_password: default_root_password(),
            root_name: default_root_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. ":memory:" is accepted for throwaway setups.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_objstore_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_objstore_key")]
    pub access_key: String,
    #[serde(default = "default_objstore_key")]
    pub secret_key: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_bucket")]
    pub default_bucket: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_objstore_endpoint(),
            access_key: default_objstore_key(),
            secret_key: default_objstore_key(),
            secure: false,
            default_bucket: default_bucket(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    Openai,
    Claude,
    Gemini,
    Databricks,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmProviderKind::Openai => "openai",
            LlmProviderKind::Claude => "claude",
            LlmProviderKind::Gemini => "gemini",
            LlmProviderKind::Databricks => "databricks",
            LlmProviderKind::Openrouter => "openrouter",
            LlmProviderKind::Ollama => "ollama",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,
    pub openai: Option<OpenAiConfig>,
    pub claude: Option<ClaudeConfig>,
    pub gemini: Option<GeminiConfig>,
    pub databricks: Option<DatabricksConfig>,
    pub openrouter: Option<OpenRouterConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    /// Optional custom endpoint (Azure-style deployments).
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_claude_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabricksConfig {
    pub api_key: String,
    /// Workspace URL, e.g. "https://<workspace>.cloud.databricks.com".
    pub base_url: String,
    #[serde(default = "default_databricks_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

/// OpenRouter. The api_key has no default on purpose: a missing key must be
/// a configuration error, never a silently shipped credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    #[serde(default = "default_openrouter_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Local engines need headroom for cold model loads.
    #[serde(default = "default_local_timeout")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_local_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_maintenance_message")]
    pub message: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message: default_maintenance_message(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_token_secret() -> String {
    "change-me".to_string()
}
fn default_token_expiry_hours() -> u64 {
    12
}
fn default_sso_token_header() -> String {
    "X-Auth-Token".to_string()
}
fn default_sso_name_header() -> String {
    "X-User-Name".to_string()
}
fn default_sso_email_header() -> String {
    "X-User-Email".to_string()
}
fn default_root_email() -> String {
    "root@localhost".to_string()
}
fn default_root_password() -> String {
    "changeme123".to_string()
}
fn default_root_name() -> String {
    "Root Admin".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.confab/confab.db", home)
}
fn default_objstore_endpoint() -> String {
    "http://localhost:9000".to_string()
}
fn default_objstore_key() -> String {
    "minioadmin".to_string()
}
fn default_bucket() -> String {
    "confab-files".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
fn default_claude_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-pro".to_string()
}
fn default_databricks_model() -> String {
    "databricks-dbrx-instruct".to_string()
}
fn default_openrouter_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "tinyllama".to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_cloud_timeout() -> u64 {
    60
}
fn default_local_timeout() -> u64 {
    300
}
fn default_max_file_size() -> usize {
    MAX_FILE_SIZE_BYTES
}
fn default_allowed_extensions() -> Vec<String> {
    [
        ".pdf", ".txt", ".csv", ".json", ".md", ".docx", ".pptx", ".xlsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_allowed_content_types() -> Vec<String> {
    [
        "application/pdf",
        "text/plain",
        "text/csv",
        "application/json",
        "text/markdown",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_maintenance_message() -> String {
    "System under maintenance. Please try again later.".to_string()
}

impl ConfabConfig {
    /// Load config from a TOML file with CONFAB_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ConfabConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONFAB_").split("__"))
            .extract()
            .map_err(|e| crate::error::ApiError::Internal(format!("config load: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on configurations that cannot possibly work.
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.auth.mode == AuthMode::Local && self.auth.token_secret.is_empty() {
            errors.push("auth.token_secret must not be empty in local mode".into());
        }
        if self.auth.token_expiry_hours == 0 {
            errors.push("auth.token_expiry_hours must be positive".into());
        }
        if !self.bootstrap.root_email.contains('@') {
            errors.push(format!(
                "bootstrap.root_email is not an email: {}",
                self.bootstrap.root_email
            ));
        }
        if self.uploads.max_file_size == 0 {
            errors.push("uploads.max_file_size must be positive".into());
        }

        // The selected provider must have a config section; credential checks
        // live with the adapters (validate_config) since only they know which
        // fields are required.
        let present = match self.llm.provider {
            LlmProviderKind::Openai => self.llm.openai.is_some(),
            LlmProviderKind::Claude => self.llm.claude.is_some(),
            LlmProviderKind::Gemini => self.llm.gemini.is_some(),
            LlmProviderKind::Databricks => self.llm.databricks.is_some(),
            LlmProviderKind::Openrouter => self.llm.openrouter.is_some(),
            LlmProviderKind::Ollama => true,
        };
        if !present {
            errors.push(format!(
                "llm.provider = {} but no [llm.{}] section is configured",
                self.llm.provider, self.llm.provider
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ApiError::Internal(format!(
                "configuration invalid: {}",
                errors.join("; ")
            )))
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.confab/confab.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ConfabConfig {
            llm: LlmConfig {
                provider: LlmProviderKind::Ollama,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn selected_provider_without_section_is_rejected() {
        let config = ConfabConfig {
            llm: LlmConfig {
                provider: LlmProviderKind::Openrouter,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn openrouter_has_no_default_api_key() {
        // Deserializing a section without api_key must fail rather than fall
        // back to any embedded credential.
        let parsed: Result<OpenRouterConfig, _> =
            serde_json::from_str(r#"{"model": "openai/gpt-4o-mini"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn ollama_defaults_to_long_timeout() {
        let config = OllamaConfig::default();
        assert_eq!(config.timeout_secs, 300);
    }
}
