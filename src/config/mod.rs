pub mod validation;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::stream::StreamOptions;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Chat backend location and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_stream_path")]
    pub chat_stream_path: String,
    #[serde(default = "default_public_stream_path")]
    pub public_stream_path: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request limit in seconds; `0` lets a stream run indefinitely.
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_chat_stream_path() -> String {
    "/api/chat/stream".to_string()
}
fn default_public_stream_path() -> String {
    "/api/chat/public/stream".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_stream_path: default_chat_stream_path(),
            public_stream_path: default_public_stream_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: 0,
            http_use_env_proxy: false,
            proxy: None,
        }
    }
}

/// Stream delivery tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Token flush delay; `0` delivers every token event on its own.
    #[serde(default = "default_coalesce_interval_ms")]
    pub coalesce_interval_ms: u64,
    #[serde(default = "default_error_body_limit_bytes")]
    pub error_body_limit_bytes: usize,
    /// Time allowed for reading a non-success response body.
    #[serde(default = "default_error_body_timeout_ms")]
    pub error_body_timeout_ms: u64,
}

fn default_coalesce_interval_ms() -> u64 {
    30
}
fn default_error_body_limit_bytes() -> usize {
    64 * 1024
}
fn default_error_body_timeout_ms() -> u64 {
    5_000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            coalesce_interval_ms: default_coalesce_interval_ms(),
            error_body_limit_bytes: default_error_body_limit_bytes(),
            error_body_timeout_ms: default_error_body_timeout_ms(),
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            coalesce_interval: Duration::from_millis(self.coalesce_interval_ms),
            error_body_limit: self.error_body_limit_bytes,
            error_body_timeout: Duration::from_millis(self.error_body_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable the CLI reads the session token from.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "CHATSTREAM_TOKEN".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Applied to requests that leave `use_rag` unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_use_rag: Option<bool>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            default_use_rag: None,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
