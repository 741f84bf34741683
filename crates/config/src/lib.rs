//! TERMAGENT CONFIG: read-only settings snapshot
//!
//! Loads and saves the JSON configuration under `~/.termagent`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub mod paths;
pub mod servers;

pub use paths::{
    chat_path, chat_session_path, config_path, data_dir, history_path, mcp_servers_path,
    memory_path,
};
pub use servers::{CapabilityServers, ServerDefinition};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("CONFIG PARSE FAILED: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CONFIG NOT FOUND: {0}")]
    NotFound(PathBuf),

    #[error("INVALID CONFIG: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Provider identifiers known to the connector factory
pub const KNOWN_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "google",
    "ollama",
    "perplexity",
    "bedrock",
];

/// Per-provider model selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Named AWS profile (Bedrock)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl ProviderConfig {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert("openai".to_string(), ProviderConfig::with_model("gpt-4o-mini"));
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig::with_model("claude-3-5-haiku-latest"),
    );
    providers.insert(
        "google".to_string(),
        ProviderConfig::with_model("gemini-2.0-flash-lite"),
    );
    providers.insert("ollama".to_string(), ProviderConfig::with_model("llama3.2"));
    providers.insert("perplexity".to_string(), ProviderConfig::with_model("sonar"));
    providers.insert(
        "bedrock".to_string(),
        ProviderConfig::with_model("anthropic.claude-3-haiku-20240307-v1:0"),
    );
    providers
}

fn default_provider() -> String {
    "bedrock".to_string()
}

/// Agent loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_result_truncation")]
    pub result_truncation: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_ask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_task: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            task_timeout_secs: default_task_timeout_secs(),
            result_truncation: default_result_truncation(),
            system_prompt_ask: None,
            system_prompt_task: None,
        }
    }
}

fn default_max_tokens() -> u32 {
    600
}

fn default_max_iterations() -> u32 {
    10
}

fn default_task_timeout_secs() -> u64 {
    900
}

fn default_result_truncation() -> usize {
    2000
}

/// `unix` tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixToolConfig {
    #[serde(default = "default_confirm")]
    pub confirm: bool,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for UnixToolConfig {
    fn default() -> Self {
        Self {
            confirm: default_confirm(),
            timeout_secs: default_command_timeout(),
            working_dir: None,
        }
    }
}

fn default_confirm() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    60
}

/// `websearch` tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

/// Built-in tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolkitConfig {
    #[serde(default)]
    pub unix: UnixToolConfig,
    #[serde(default)]
    pub websearch: WebSearchConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub toolkit: ToolkitConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_file_path: Option<String>,
    /// Fold remembered facts into chat prompts
    #[serde(default)]
    pub memory: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: default_providers(),
            agent: AgentDefaults::default(),
            toolkit: ToolkitConfig::default(),
            mcp_file_path: None,
            memory: false,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config found, using defaults");
            return Ok(Config::default());
        }

        debug!(path = %path.display(), "reading config");
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "writing config");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Configured model for a provider, empty when unset
    pub fn model_for(&self, provider: &str) -> String {
        self.providers
            .get(provider)
            .map(|p| p.model.clone())
            .unwrap_or_default()
    }

    /// Base URL override for a provider
    pub fn base_url_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.base_url.clone())
            .filter(|url| !url.is_empty())
    }

    /// AWS profile configured for a provider
    pub fn profile_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.profile.clone())
            .filter(|profile| !profile.is_empty())
    }

    /// Model for the default provider
    pub fn default_model(&self) -> String {
        self.model_for(&self.default_provider)
    }

    pub fn set_default_provider(&mut self, provider: &str) -> Result<()> {
        if !KNOWN_PROVIDERS.contains(&provider) {
            return Err(ConfigError::Invalid(format!(
                "unknown provider '{}', expected one of: {}",
                provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }
        self.default_provider = provider.to_string();
        Ok(())
    }

    /// Set the model of the default provider
    pub fn set_model(&mut self, model: &str) {
        let provider = self.default_provider.clone();
        self.providers.entry(provider).or_default().model = model.to_string();
    }

    pub fn set_mcp_file_path(&mut self, path: &str) {
        self.mcp_file_path = Some(path.to_string());
    }

    /// Resolved capability-server file path, if any is configured
    pub fn mcp_path(&self) -> Option<PathBuf> {
        self.mcp_file_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(paths::expand_home)
    }

    /// Load capability servers. No configured path or a missing file yields
    /// an empty set; a malformed file is an error.
    pub async fn capability_servers(&self) -> Result<CapabilityServers> {
        let Some(path) = self.mcp_path() else {
            return Ok(CapabilityServers::default());
        };
        match CapabilityServers::load_from(&path).await {
            Err(ConfigError::NotFound(missing)) => {
                info!(path = %missing.display(), "capability server file not found");
                Ok(CapabilityServers::default())
            }
            other => other,
        }
    }
}
