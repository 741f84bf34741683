//! Capability-server definitions
//!
//! The file format is `{ "servers": { "<name>": { "command", "args", "env" } } }`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::{ConfigError, Result};

/// One stdio capability server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// All configured capability servers, keyed by server name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityServers {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerDefinition>,
}

impl CapabilityServers {
    /// Parse a server file. A missing file is an error here; callers decide
    /// whether that matters.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        debug!(path = %path.display(), "loading capability servers");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let servers: CapabilityServers = serde_json::from_str(content)?;
        for (name, def) in &servers.servers {
            if def.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "server '{}' has an empty command",
                    name
                )));
            }
        }
        Ok(servers)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Server entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServerDefinition)> {
        self.servers.iter()
    }
}
