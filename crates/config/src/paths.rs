//! Path utilities

use std::path::{Path, PathBuf};

/// Data directory (~/.termagent), falling back to a relative `.termagent`
/// when no home directory can be resolved.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".termagent"))
        .unwrap_or_else(|| PathBuf::from(".termagent"))
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Query history location
pub fn history_path() -> PathBuf {
    data_dir().join("history.jsonl")
}

/// Remembered facts folded into prompts
pub fn memory_path() -> PathBuf {
    data_dir().join("memory.jsonl")
}

/// Chat turns of every session
pub fn chat_path() -> PathBuf {
    data_dir().join("chat.jsonl")
}

/// Holds the id of the current chat session
pub fn chat_session_path() -> PathBuf {
    data_dir().join("chat_session")
}

/// Default capability-server definitions location
pub fn mcp_servers_path() -> PathBuf {
    data_dir().join("mcp.json")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
