//! JSON-lines history file

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use termagent_agent::{HistoryRecord, HistorySink};

/// Appends one JSON object per line
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The last `limit` records, oldest first. Unreadable lines are skipped.
    pub async fn recent(&self, limit: usize) -> std::io::Result<Vec<HistoryRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let records: Vec<HistoryRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn record(&self, record: &HistoryRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
