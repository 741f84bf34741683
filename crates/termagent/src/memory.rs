//! Remembered facts, one JSON object per line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// One remembered fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store `content` unless an identical entry exists. Returns whether
    /// anything was written.
    pub async fn add(&self, content: &str) -> std::io::Result<bool> {
        if self.list().await?.iter().any(|entry| entry.content == content) {
            debug!(content, "already remembered");
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let entry = MemoryEntry {
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Every entry in insertion order. A missing file is empty; a corrupt
    /// line is an error.
    pub async fn list(&self) -> std::io::Result<Vec<MemoryEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
            .collect()
    }

    /// `<memory>` block for a system prompt, empty when nothing is stored
    pub async fn format_as_prompt(&self) -> std::io::Result<String> {
        let entries = self.list().await?;
        if entries.is_empty() {
            return Ok(String::new());
        }
        let lines: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        Ok(format!("<memory>\n{}\n</memory>", lines.join("\n")))
    }
}
