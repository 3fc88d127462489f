//! Configuration loading, validation, and management for Atlas.
//!
//! Loads configuration from `~/.atlas/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.atlas/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Background job settings
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the inference endpoint
    #[serde(default = "default_host")]
    pub host: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub name: String,

    /// Connect and read timeout for endpoint calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature; endpoint default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_host() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            name: default_model(),
            timeout_secs: default_timeout_secs(),
            temperature: None,
        }
    }
}

/// Which brokerage environment tool handlers act against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingEnvironment {
    #[default]
    Paper,
    Live,
}

impl TradingEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }
}

impl std::str::FromStr for TradingEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(ConfigError::ValidationError(format!(
                "Trading environment must be either 'paper' or 'live', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base system prompt; tool guidance is appended at runtime
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Model turns allowed per user message before the turn is aborted
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default)]
    pub environment: TradingEnvironment,
}

fn default_system_prompt() -> String {
    "You are Atlas, a trading assistant. Use tools when helpful and confirm critical actions."
        .into()
}
fn default_max_tool_rounds() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_rounds: default_max_tool_rounds(),
            environment: TradingEnvironment::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Jobs allowed to run at the same time
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    2
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.atlas/config.toml).
    ///
    /// Environment variables override file values:
    /// - `OLLAMA_HOST`
    /// - `ATLAS_AI_MODEL`
    /// - `ATLAS_AI_SYSTEM_PROMPT`
    /// - `ATLAS_ENV`
    /// - `ATLAS_MAX_TOOL_ROUNDS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read_file(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = non_empty("OLLAMA_HOST") {
            self.model.host = host;
        }
        if let Some(model) = non_empty("ATLAS_AI_MODEL") {
            self.model.name = model;
        }
        if let Some(prompt) = lookup("ATLAS_AI_SYSTEM_PROMPT") {
            self.agent.system_prompt = prompt;
        }
        if let Some(env) = non_empty("ATLAS_ENV") {
            self.agent.environment = env.parse()?;
        }
        if let Some(rounds) = non_empty("ATLAS_MAX_TOOL_ROUNDS") {
            self.agent.max_tool_rounds = rounds.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "ATLAS_MAX_TOOL_ROUNDS must be a positive integer, got '{rounds}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".atlas")
    }

    /// Validate the configuration, normalizing the endpoint URL.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.model.host.starts_with("http://") || self.model.host.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "model.host must be an http(s) URL, got '{}'",
                self.model.host
            )));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("model.name must not be empty".into()));
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "model.timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(t) = self.model.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "model.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.jobs.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "jobs.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The endpoint base URL without a trailing slash.
    pub fn model_host(&self) -> &str {
        self.model.host.trim_end_matches('/')
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml()
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.host, "http://localhost:11434");
        assert_eq!(config.model.name, "llama3.2");
        assert_eq!(config.agent.max_tool_rounds, 3);
        assert_eq!(config.agent.environment, TradingEnvironment::Paper);
        assert_eq!(config.jobs.max_workers, 2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.name, config.model.name);
        assert_eq!(parsed.agent.max_tool_rounds, config.agent.max_tool_rounds);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.timeout_secs, 30);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[model]\nname = \"qwen2.5\"\n\n[agent]\nenvironment = \"live\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model.name, "qwen2.5");
        assert_eq!(config.model.host, "http://localhost:11434");
        assert_eq!(config.agent.environment, TradingEnvironment::Live);
        assert_eq!(config.agent.max_tool_rounds, 3);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[model\nname = ").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("OLLAMA_HOST", "http://gpu-box:11434/"),
                ("ATLAS_AI_MODEL", "  mistral "),
                ("ATLAS_ENV", "LIVE"),
                ("ATLAS_MAX_TOOL_ROUNDS", "5"),
            ]))
            .unwrap();

        assert_eq!(config.model_host(), "http://gpu-box:11434");
        assert_eq!(config.model.name, "mistral");
        assert_eq!(config.agent.environment, TradingEnvironment::Live);
        assert_eq!(config.agent.max_tool_rounds, 5);
    }

    #[test]
    fn blank_model_override_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("ATLAS_AI_MODEL", "   ")])).unwrap();
        assert_eq!(config.model.name, "llama3.2");
    }

    #[test]
    fn unknown_environment_rejected() {
        let mut config = AppConfig::default();
        let err = config.apply_env(env(&[("ATLAS_ENV", "sandbox")])).unwrap_err();
        assert!(err.to_string().contains("'paper' or 'live'"));
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_tool_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_host_rejected() {
        let mut config = AppConfig::default();
        config.model.host = "localhost:11434".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("llama3.2"));
        assert!(toml_str.contains("max_tool_rounds = 3"));
    }
}
