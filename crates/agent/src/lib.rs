//! Terminal agent core
//!
//! Tool registry, built-in and capability-server tools, and the task loop
//! that drives a [`Connector`](termagent_provider::Connector) through
//! rounds of thinking and tool use.

use std::fmt;
use thiserror::Error;

use termagent_config::ConfigError;
use termagent_provider::ConnectorError;

pub mod agent;
pub mod context;
pub mod history;
pub mod mcp;
pub mod operator;
pub mod task;
pub mod tools;

pub use agent::{Agent, AgentOptions, TaskReport};
pub use context::{SystemContext, SystemPrompts};
pub use history::{HistoryRecord, HistorySink};
pub use operator::{Operator, TerminalOperator};
pub use task::{TaskState, TaskStatus};
pub use tools::{Tool, ToolContext, ToolError, ToolRegistry};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("EMPTY QUERY")]
    EmptyQuery,

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("TOOL NOT FOUND: {0}")]
    ToolNotFound(String),

    #[error("INVALID ARGUMENTS: {0}")]
    InvalidArguments(String),

    #[error("TOOL FAILED: {0}")]
    Tool(String),

    #[error("TASK TIMED OUT AFTER {0} SECONDS")]
    Timeout(u64),

    #[error("TASK CANCELLED")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => AgentError::ToolNotFound(name),
            ToolError::InvalidArguments(reason) => AgentError::InvalidArguments(reason),
            ToolError::Cancelled => AgentError::Cancelled,
            other => AgentError::Tool(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Error taxonomy shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyQuery,
    Forbidden,
    Transport,
    MalformedResponse,
    InvalidArguments,
    ToolNotFound,
    Timeout,
    Cancelled,
    /// Provider refused the request for a reason other than credentials
    Provider,
    /// Local failures: config, tool runtime
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyQuery => "empty query",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Transport => "transport",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::InvalidArguments => "invalid arguments",
            ErrorKind::ToolNotFound => "tool not found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Provider => "provider",
            ErrorKind::Other => "error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::EmptyQuery => ErrorKind::EmptyQuery,
            AgentError::Connector(err) => match err {
                ConnectorError::Forbidden { .. } => ErrorKind::Forbidden,
                ConnectorError::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
                ConnectorError::Transport(_) | ConnectorError::Network(_) => ErrorKind::Transport,
                ConnectorError::MalformedResponse(_) => ErrorKind::MalformedResponse,
                ConnectorError::Cancelled => ErrorKind::Cancelled,
                ConnectorError::Schema(_)
                | ConnectorError::Api { .. }
                | ConnectorError::RateLimited
                | ConnectorError::UnknownProvider(_)
                | ConnectorError::InvalidRequest(_) => ErrorKind::Provider,
            },
            AgentError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            AgentError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Tool(_) | AgentError::Config(_) => ErrorKind::Other,
        }
    }
}
