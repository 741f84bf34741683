//! Chat sessions: turns in a JSON-lines file plus a current-session marker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use termagent_provider::{Message, Role};

/// One stored turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatTurn {
    session: u64,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

pub struct ChatSessions {
    turns: PathBuf,
    marker: PathBuf,
}

impl ChatSessions {
    pub fn new(turns: impl Into<PathBuf>, marker: impl Into<PathBuf>) -> Self {
        Self {
            turns: turns.into(),
            marker: marker.into(),
        }
    }

    /// Id in the marker file. A missing or unreadable marker means none.
    pub async fn current(&self) -> std::io::Result<Option<u64>> {
        match tokio::fs::read_to_string(&self.marker).await {
            Ok(text) => match text.trim().parse() {
                Ok(id) => Ok(Some(id)),
                Err(_) => {
                    warn!(path = %self.marker.display(), "ignoring unreadable chat session marker");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Begin a session with an id above every one seen so far.
    pub async fn start_new(&self) -> std::io::Result<u64> {
        let highest_stored = self.read_turns().await?.iter().map(|t| t.session).max();
        let id = highest_stored.max(self.current().await?).unwrap_or(0) + 1;
        if let Some(parent) = self.marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.marker, id.to_string()).await?;
        debug!(session = id, "started chat session");
        Ok(id)
    }

    pub async fn current_or_start(&self) -> std::io::Result<u64> {
        match self.current().await? {
            Some(id) => Ok(id),
            None => self.start_new().await,
        }
    }

    /// Turns of `session`, oldest first
    pub async fn messages(&self, session: u64) -> std::io::Result<Vec<Message>> {
        Ok(self
            .read_turns()
            .await?
            .into_iter()
            .filter(|turn| turn.session == session)
            .map(|turn| Message {
                role: turn.role,
                content: turn.content,
            })
            .collect())
    }

    pub async fn append(&self, session: u64, message: &Message) -> std::io::Result<()> {
        if let Some(parent) = self.turns.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let turn = ChatTurn {
            session,
            role: message.role,
            content: message.content.clone(),
            timestamp: Utc::now(),
        };
        let mut line = serde_json::to_string(&turn)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.turns)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Unreadable lines are skipped.
    async fn read_turns(&self) -> std::io::Result<Vec<ChatTurn>> {
        let content = match tokio::fs::read_to_string(&self.turns).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
