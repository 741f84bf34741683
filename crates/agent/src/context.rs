//! System prompts and the system-context header

use chrono::Local;
use std::path::PathBuf;

use termagent_config::AgentDefaults;

/// Placeholder replaced by the system-context header
pub const HEADER_PLACEHOLDER: &str = "{{header}}";

pub const ASK_PROMPT: &str = "{{header}}

Answer the user's question directly and concisely. Prefer concrete commands
and short explanations. When a command is the answer, show it in a fenced
code block. If the question is ambiguous, state the assumption you made.";

pub const TASK_PROMPT: &str = "{{header}}

You solve tasks step by step. Each turn you receive the original task, your
progress so far and the results of previous tool calls.

Use at most one tool per turn and only when it is needed. Provide every
required tool argument. If a tool fails, read the error and try a different
approach. Use `user_clarification` only when the task cannot be completed
without more information from the user.

When the task is complete, call `final_answer` with the complete answer.";

/// Facts about the machine the assistant runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemContext {
    pub hostname: String,
    pub username: String,
    pub time: String,
    pub working_dir: String,
    pub os: String,
    pub arch: String,
}

fn non_empty(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

impl SystemContext {
    pub fn gather() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok());
        let username = std::env::var("USER")
            .ok()
            .or_else(|| std::env::var("USERNAME").ok());
        let working_dir = std::env::current_dir()
            .ok()
            .or_else(dirs::home_dir)
            .map(|p: PathBuf| p.display().to_string());

        Self {
            hostname: non_empty(hostname),
            username: non_empty(username),
            time: Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            working_dir: non_empty(working_dir),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn header(&self) -> String {
        format!(
            "You are a Unix terminal helper.\n\
             You are mainly called from a Unix terminal and asked about Unix terminal questions.\n\n\
             Current system context:\n\
             - Hostname: {}\n\
             - User: {}\n\
             - Time: {}\n\
             - Working Directory: {}\n\
             - Operating System: {}\n\
             - Architecture: {}",
            self.hostname, self.username, self.time, self.working_dir, self.os, self.arch
        )
    }
}

/// Rendered system prompts for single questions and for tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompts {
    pub ask: String,
    pub task: String,
}

impl SystemPrompts {
    pub fn render(header: &str, ask: Option<&str>, task: Option<&str>) -> Self {
        Self {
            ask: ask.unwrap_or(ASK_PROMPT).replace(HEADER_PLACEHOLDER, header),
            task: task.unwrap_or(TASK_PROMPT).replace(HEADER_PLACEHOLDER, header),
        }
    }

    /// Put a memory block ahead of the ask prompt. Blank blocks change nothing.
    pub fn with_memory(mut self, memory: &str) -> Self {
        if !memory.trim().is_empty() {
            self.ask = format!("{}\n\n{}", memory, self.ask);
        }
        self
    }

    /// Built-in bodies unless the config overrides them
    pub fn from_config(agent: &AgentDefaults) -> Self {
        let header = SystemContext::gather().header();
        Self::render(
            &header,
            agent.system_prompt_ask.as_deref(),
            agent.system_prompt_task.as_deref(),
        )
    }
}

impl Default for SystemPrompts {
    fn default() -> Self {
        Self::render(&SystemContext::gather().header(), None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let context = SystemContext::gather();
        let header = context.header();
        for expected in [
            "You are a Unix terminal helper",
            "Current system context:",
            "Hostname:",
            "User:",
            "Time:",
            "Working Directory:",
            "Operating System:",
        ] {
            assert!(header.contains(expected), "missing {}", expected);
        }
        assert!(header.contains(&context.os));
        assert!(!context.hostname.is_empty());
    }

    #[test]
    fn test_render_defaults() {
        let prompts = SystemPrompts::render("HEADER", None, None);
        assert!(prompts.ask.starts_with("HEADER\n\nAnswer"));
        assert!(prompts.task.contains("final_answer"));
        assert!(!prompts.task.contains(HEADER_PLACEHOLDER));
    }

    #[test]
    fn test_render_overrides() {
        let prompts = SystemPrompts::render("HEADER", Some("custom ask"), Some("{{header}} -- custom task"));
        assert_eq!(prompts.ask, "custom ask");
        assert_eq!(prompts.task, "HEADER -- custom task");
    }

    #[test]
    fn test_memory_goes_ahead_of_ask_prompt() {
        let prompts = SystemPrompts::render("HEADER", Some("base"), None)
            .with_memory("<memory>\nuse catimg\n</memory>");
        assert_eq!(prompts.ask, "<memory>\nuse catimg\n</memory>\n\nbase");
        assert!(!prompts.task.contains("<memory>"));

        let unchanged = SystemPrompts::render("HEADER", Some("base"), None).with_memory("  ");
        assert_eq!(unchanged.ask, "base");
    }
}
