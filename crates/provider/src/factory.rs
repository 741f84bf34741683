//! Connector factory
//!
//! Picks the adapter for a provider identifier. Credentials are read here,
//! at construction, but a missing credential only surfaces as `Forbidden`
//! when a call is actually made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::{
    AnthropicConnector, BedrockConnector, Connector, ConnectorError, GoogleConnector,
    OllamaConnector, OpenAiConnector, PerplexityConnector, Result,
};

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
    Perplexity,
    Bedrock,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Ollama,
        ProviderKind::Perplexity,
        ProviderKind::Bedrock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Perplexity => "perplexity",
            ProviderKind::Bedrock => "bedrock",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Google => "gemini-2.0-flash-lite",
            ProviderKind::Ollama => "llama3.2",
            ProviderKind::Perplexity => "sonar",
            ProviderKind::Bedrock => "anthropic.claude-3-haiku-20240307-v1:0",
        }
    }

    /// Environment variable holding the credential. Bedrock resolves
    /// credentials through the AWS chain instead.
    pub fn credential_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Google => Some("GEMINI_API_KEY"),
            ProviderKind::Perplexity => Some("PERPLEXITY_KEY"),
            ProviderKind::Bedrock | ProviderKind::Ollama => None,
        }
    }

    /// Remediation shown with `Forbidden`
    pub fn credential_hint(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "set OPENAI_API_KEY",
            ProviderKind::Anthropic => "set ANTHROPIC_API_KEY",
            ProviderKind::Google => "set GEMINI_API_KEY",
            ProviderKind::Perplexity => "set PERPLEXITY_KEY",
            ProviderKind::Bedrock => {
                "configure AWS credentials (AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY, ~/.aws/credentials, AWS_PROFILE or `aws sso login`) with Bedrock access"
            }
            ProviderKind::Ollama => "check OLLAMA_HOST and any proxy in front of the Ollama server",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == id)
            .ok_or_else(|| ConnectorError::UnknownProvider(s.to_string()))
    }
}

/// Construction-time settings; normally read from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorOptions {
    pub api_key: Option<String>,
    /// AWS secret key, Bedrock only. With `api_key` it replaces the AWS chain.
    pub secret_key: Option<String>,
    /// AWS session token, Bedrock only
    pub session_token: Option<String>,
    /// Named AWS profile, Bedrock only
    pub profile: Option<String>,
    pub base_url: Option<String>,
    pub region: Option<String>,
}

impl ConnectorOptions {
    /// Read credentials and endpoints for `kind` from the process environment.
    pub fn from_env(kind: ProviderKind) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut options = ConnectorOptions {
            api_key: kind.credential_env().and_then(var),
            ..Default::default()
        };
        // Bedrock keys, profile and region come from the AWS chain
        if kind == ProviderKind::Ollama {
            options.base_url = var("OLLAMA_HOST");
        }
        options
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

/// Build the connector for `provider_id`, reading credentials from the
/// environment. An empty `model_id` selects the provider's default model.
pub fn create_connector(provider_id: &str, model_id: &str) -> Result<Arc<dyn Connector>> {
    let kind: ProviderKind = provider_id.parse()?;
    create_connector_with(kind, model_id, ConnectorOptions::from_env(kind))
}

/// Build a connector with explicit options.
pub fn create_connector_with(
    kind: ProviderKind,
    model_id: &str,
    options: ConnectorOptions,
) -> Result<Arc<dyn Connector>> {
    let model = if model_id.trim().is_empty() {
        kind.default_model().to_string()
    } else {
        model_id.trim().to_string()
    };
    debug!(provider = %kind, model = %model, "creating connector");

    let connector: Arc<dyn Connector> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiConnector::new(model, options)),
        ProviderKind::Anthropic => Arc::new(AnthropicConnector::new(model, options)),
        ProviderKind::Google => Arc::new(GoogleConnector::new(model, options)),
        ProviderKind::Ollama => Arc::new(OllamaConnector::new(model, options)),
        ProviderKind::Perplexity => Arc::new(PerplexityConnector::new(model, options)),
        ProviderKind::Bedrock => Arc::new(BedrockConnector::new(model, options)),
    };
    Ok(connector)
}
