use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bridge_socket")]
    pub bridge_socket: String,

    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_classifier_rules_path")]
    pub classifier_rules_path: String,

    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_max_iterations")]
    pub max_continuation_iterations: u32,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_session_max_messages")]
    pub session_max_messages: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub executors: ExecutorsConfig,
}

// -- LLM -------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Provider to use: "claude" (Anthropic Messages API, default) or
    /// "openrouter" (OpenAI-compatible HTTP).
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Model name (e.g. "claude-sonnet-4-5", or an OpenRouter model slug).
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Base URL for the Anthropic backend.
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,

    /// API key for the Anthropic backend. Config-only: the core consumes
    /// no environment variables beyond `CAPABILITY_SECRET`.
    #[serde(default)]
    pub anthropic_api_key: String,

    /// Base URL for the openrouter backend.
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,

    /// API key for the openrouter backend. Config-only: the core consumes
    /// no environment variables beyond `CAPABILITY_SECRET`.
    #[serde(default)]
    pub openrouter_api_key: String,

    /// Upper bound on tokens generated per LLM call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_model(),
            timeout_secs: default_llm_timeout_secs(),
            anthropic_base_url: default_anthropic_base_url(),
            anthropic_api_key: String::new(),
            openrouter_base_url: default_openrouter_base_url(),
            openrouter_api_key: String::new(),
            max_tokens: default_max_tokens(),
        }
    }
}

// -- Executors ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecutorsConfig {
    #[serde(default)]
    pub shell: ExecutorConfig,

    #[serde(default)]
    pub file: ExecutorConfig,

    #[serde(default)]
    pub web: ExecutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Container image used to run this executor kind.
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: i64,

    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    /// Host paths the capability may mount, relative to the workspace root.
    #[serde(default)]
    pub mounts: Vec<String>,

    /// Allowed egress domains for the web executor. Ignored by shell/file.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_quota: default_cpu_quota(),
            mounts: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_bridge_socket() -> String {
    "/run/secureclaw/bridge.sock".to_string()
}
fn default_audit_dir() -> String {
    "/var/log/secureclaw".to_string()
}
fn default_db_path() -> String {
    "secureclaw.db".to_string()
}
fn default_classifier_rules_path() -> String {
    "classifier.toml".to_string()
}
fn default_approval_timeout_secs() -> u64 {
    300
}
fn default_max_turns() -> u32 {
    10
}
fn default_max_iterations() -> u32 {
    10
}
fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_session_max_messages() -> usize {
    50
}
fn default_llm_provider() -> String {
    "claude".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_max_tokens() -> usize {
    4096
}
fn default_image() -> String {
    "secureclaw/executor:latest".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_output_bytes() -> usize {
    1_048_576
}
fn default_memory_limit_mb() -> i64 {
    256
}
fn default_cpu_quota() -> i64 {
    100_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_socket: default_bridge_socket(),
            audit_dir: default_audit_dir(),
            db_path: default_db_path(),
            classifier_rules_path: default_classifier_rules_path(),
            approval_timeout_secs: default_approval_timeout_secs(),
            max_turns: default_max_turns(),
            max_continuation_iterations: default_max_iterations(),
            session_ttl_secs: default_session_ttl_secs(),
            session_max_messages: default_session_max_messages(),
            llm: LlmConfig::default(),
            executors: ExecutorsConfig::default(),
        }
    }
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location.
    /// A missing file is not an error: the daemon falls back to defaults,
    /// since the configuration file path itself is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| CoreError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found at {}, using defaults", config_path.display());
            Config::default()
        };

        Ok(config)
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/secureclaw/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("secureclaw")
            .join("config.toml")
    }

    /// Returns the data directory: `$XDG_DATA_HOME/secureclaw/`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("secureclaw")
    }

    /// Reads the HMAC signing key for capability tokens from the environment.
    /// Required; fatal at startup if absent.
    pub fn capability_secret() -> Result<String> {
        std::env::var("CAPABILITY_SECRET")
            .map_err(|_| CoreError::Config("CAPABILITY_SECRET environment variable not set".into()))
    }

    /// Generate the default config file contents, for `secureclaw-core --init-config`.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}
