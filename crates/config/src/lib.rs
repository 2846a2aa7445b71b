//! Configuration loading, validation, and management for Campusd.
//!
//! Loads configuration from `campusd.toml` with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `campusd.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning-service configuration
    #[serde(default)]
    pub reasoner: ReasonerConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Guardrail configuration
    #[serde(default)]
    pub guardrail: GuardrailConfig,

    /// Agent (dispatch loop) configuration
    #[serde(default)]
    pub agent: AgentConfig,
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
            .field("reasoner", &self.reasoner)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .field("guardrail", &self.guardrail)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// API key (overridable via CAMPUSD_API_KEY / OPENAI_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bounded wait for each reasoning-service call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    60
}

impl std::fmt::Debug for ReasonerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasonerConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: "memory" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (ignored by the memory backend)
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_store_path() -> String {
    "campusd.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Static bearer tokens accepted on /v1 routes.
    /// Empty list = open dev mode (a warning is logged at startup).
    #[serde(default)]
    pub bearer_tokens: Vec<String>,

    /// Allowed CORS origins; empty = same-origin only
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_tokens: vec![],
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Denylist terms; empty = use the stock list
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self { denylist: vec![] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System preamble prepended to every turn
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Capacity of the per-loop session-history cache
    #[serde(default = "default_history_cache_capacity")]
    pub history_cache_capacity: usize,
}

fn default_system_prompt() -> String {
    "You are the campus administration assistant. Use the available functions \
     to manage students, report analytics, and answer campus questions. Answer \
     concisely and never invent student records."
        .into()
}
fn default_history_cache_capacity() -> usize {
    256
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_cache_capacity: default_history_cache_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (`./campusd.toml`).
    ///
    /// Also checks environment variables for API keys:
    /// - `CAMPUSD_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(Path::new("campusd.toml"))
    }

    /// Load configuration from a specific file path with env overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.reasoner.api_key.is_none() {
            config.reasoner.api_key = std::env::var("CAMPUSD_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CAMPUSD_MODEL") {
            config.reasoner.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a file without env overrides.
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

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.reasoner.temperature < 0.0 || self.reasoner.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "reasoner.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.reasoner.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reasoner.timeout_secs must be > 0".into(),
            ));
        }

        match self.store.backend.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown store backend '{other}' (use \"memory\" or \"sqlite\")"
                )));
            }
        }

        if self.agent.history_cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_cache_capacity must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.reasoner.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reasoner: ReasonerConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            guardrail: GuardrailConfig::default(),
            agent: AgentConfig::default(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.store.backend, "sqlite");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.reasoner.model, config.reasoner.model);
        assert_eq!(parsed.agent.history_cache_capacity, 256);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let toml_str = r#"
            [reasoner]
            temperature = 3.5
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_store_backend_rejected() {
        let toml_str = r#"
            [store]
            backend = "mongodb"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.reasoner.model, "gpt-4o-mini");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campusd.toml");
        std::fs::write(
            &path,
            r#"
            [gateway]
            port = 9000
            bearer_tokens = ["secret-token"]

            [guardrail]
            denylist = ["plagiarism"]
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.bearer_tokens, vec!["secret-token"]);
        assert_eq!(config.guardrail.denylist, vec!["plagiarism"]);
        // Untouched sections keep defaults
        assert_eq!(config.store.backend, "sqlite");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut config = AppConfig::default();
        config.reasoner.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[reasoner]"));
        assert!(toml_str.contains("[gateway]"));
    }
}
