//! Configuration management for Toolmux
//!
//! Handles loading, saving, validating and environment overrides for the
//! model settings and the ordered list of tool providers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::ModelParams;
use crate::namespace::validate_provider_name;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to various tools through the Model Context Protocol (MCP).
You can use these tools to help users accomplish their tasks. When a user asks for something that requires tool usage,
analyze the request and use the appropriate tools to fulfill it.

Always explain what you're doing and provide clear, helpful responses.";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Language model settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentConfig,
    /// Audit log settings
    #[serde(default)]
    pub audit: AuditConfig,
    /// Tool providers, in connection order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Get a provider config by name
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Providers that should be connected at startup, in order
    pub fn enabled_providers(&self) -> Vec<ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled).cloned().collect()
    }

    /// Check structural constraints that do not depend on the environment
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            validate_provider_name(&provider.name).map_err(|e| Error::Config(e.to_string()))?;
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "Provider '{}' is configured more than once",
                    provider.name
                )));
            }
            if provider.command.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Provider '{}' has an empty command",
                    provider.name
                )));
            }
        }

        if self.agent.max_iterations == 0 {
            return Err(Error::Config("agent.max_iterations must be at least 1".to_string()));
        }
        if self.model.max_tokens == 0 {
            return Err(Error::Config("model.max_tokens must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(Error::Config(format!(
                "model.temperature must be between 0 and 1, got {}",
                self.model.temperature
            )));
        }
        Ok(())
    }

    /// The API key, or a configuration error naming where it was looked for
    pub fn require_api_key(&self) -> Result<String> {
        self.model.get_api_key().ok_or_else(|| {
            let env = self.model.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
            Error::Config(format!(
                "{} is required. Please set it in your environment or config file.",
                env
            ))
        })
    }

    /// Apply `MODEL_NAME`, `MAX_TOKENS` and `TEMPERATURE` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; unparsable values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("MODEL_NAME").filter(|m| !m.is_empty()) {
            self.model.model = model;
        }
        if let Some(raw) = lookup("MAX_TOKENS") {
            match raw.trim().parse() {
                Ok(max_tokens) => self.model.max_tokens = max_tokens,
                Err(_) => warn!(value = %raw, "Ignoring invalid MAX_TOKENS"),
            }
        }
        if let Some(raw) = lookup("TEMPERATURE") {
            match raw.trim().parse() {
                Ok(temperature) => self.model.temperature = temperature,
                Err(_) => warn!(value = %raw, "Ignoring invalid TEMPERATURE"),
            }
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier sent to the backend
    pub model: String,
    /// Maximum output tokens per request
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// API key (takes precedence over `api_key_env`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable name for API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Messages endpoint override (proxies, gateways)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// HTTP timeout for one model request
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            api_key: None,
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            base_url: None,
            timeout_secs: 300,
        }
    }
}

impl ModelConfig {
    /// Get the API key, checking environment variable if not set directly
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_name = self.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
        std::env::var(env_name).ok().filter(|key| !key.is_empty())
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Conversation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on model round trips per `chat` call
    pub max_iterations: usize,
    /// System prompt sent with every request
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write JSONL audit records
    pub enabled: bool,
    /// Directory for `session_*.jsonl` files
    pub log_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// One tool provider process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique name, also the tool namespace
    pub name: String,
    /// Executable to launch
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides layered over the inherited environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path; a missing file means defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("toolmux").join("config.toml"))
    }

    /// Load configuration from a file
    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the manager, keeping the configuration
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Add or replace a provider, keeping its position if it already exists
    pub fn set_provider(&mut self, provider: ProviderConfig) {
        match self.config.providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => *existing = provider,
            None => self.config.providers.push(provider),
        }
    }

    /// Remove a provider by name; returns whether it existed
    pub fn remove_provider(&mut self, name: &str) -> bool {
        let before = self.config.providers.len();
        self.config.providers.retain(|p| p.name != name);
        self.config.providers.len() != before
    }
}
