//! The human at the terminal

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::tools::{ToolError, ToolResult};

/// Answers clarification questions and approves commands
#[async_trait]
pub trait Operator: Send + Sync {
    /// Show `question` and return the reply.
    async fn ask(&self, question: &str) -> ToolResult<String>;

    /// Yes/no confirmation; anything but `y`/`yes` is a no.
    async fn confirm(&self, prompt: &str) -> ToolResult<bool>;
}

/// Operator reading from stdin and writing to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalOperator;

impl TerminalOperator {
    async fn prompt(&self, text: &str) -> ToolResult<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            return Err(ToolError::Execution("no input available on stdin".to_string()));
        }
        Ok(line.trim().to_string())
    }
}

/// `y` or `yes`, case-insensitive
pub fn is_affirmative(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn ask(&self, question: &str) -> ToolResult<String> {
        self.prompt(&format!("\nNeed clarification: {}\n> ", question))
            .await
    }

    async fn confirm(&self, prompt: &str) -> ToolResult<bool> {
        let reply = self.prompt(&format!("{} [y/N]: ", prompt)).await?;
        Ok(is_affirmative(&reply))
    }
}
