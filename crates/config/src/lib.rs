//! Configuration loading, validation, and management for the catalog copilot.
//!
//! Loads configuration from `~/.copilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.copilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// LLM provider
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier sent to the provider
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Conversation behavior
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Where `get_object` reads objects from
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("assistant", &self.assistant)
            .field("catalog", &self.catalog)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Display name used in the system prompt
    #[serde(default = "default_assistant_name")]
    pub name: String,

    /// LLM round-trips allowed after a single user message
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Per-tool execution limit in seconds (0 = unlimited)
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// LLM request limit in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_assistant_name() -> String {
    "Copilot".into()
}
fn default_max_tool_rounds() -> u32 {
    25
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl AssistantConfig {
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory whose subdirectories are buckets
    #[serde(default = "default_catalog_root")]
    pub root: PathBuf,

    /// Documents above this size are described instead of attached
    #[serde(default = "default_preview_threshold")]
    pub preview_threshold_bytes: u64,
}

fn default_catalog_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_preview_threshold() -> u64 {
    500 * 1024
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: default_catalog_root(),
            preview_threshold_bytes: default_preview_threshold(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.copilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `COPILOT_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `COPILOT_PROVIDER`
    /// - `COPILOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("COPILOT_API_KEY").or_else(|| var("ANTHROPIC_API_KEY"));
        }

        if let Some(provider) = var("COPILOT_PROVIDER") {
            self.provider = provider;
        }

        if let Some(model) = var("COPILOT_MODEL") {
            self.model = model;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".copilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }

        if self.assistant.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "assistant.max_tool_rounds must be > 0".into(),
            ));
        }

        if self.assistant.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "assistant.request_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// The API key for `provider`: its own section first, then the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
    }

    /// The model for `provider`: its own section first, then the global model.
    pub fn model_for(&self, provider: &str) -> &str {
        self.providers
            .get(provider)
            .and_then(|p| p.model.as_deref())
            .unwrap_or(&self.model)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.provider).is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            assistant: AssistantConfig::default(),
            catalog: CatalogConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for copilot_core::Error {
    fn from(e: ConfigError) -> Self {
        copilot_core::Error::Config {
            message: e.to_string(),
        }
    }
}
