//! History sink contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One finished top-level call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// `ask` or `task`
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub answer: String,
}

impl HistoryRecord {
    pub fn new(method: impl Into<String>, query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            timestamp: Utc::now(),
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// Receives a record after each successful `question` or `task`
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, record: &HistoryRecord) -> std::io::Result<()>;
}
