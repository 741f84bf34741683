//! CONNECTOR: Language Model Backends
//!
//! A single contract (`Connector`) over six structurally different
//! tool-calling backends. The agent loop only ever sees the types in this
//! module; wire formats stay inside each adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod anthropic;
pub mod bedrock;
pub mod factory;
pub mod google;
mod http;
pub mod ollama;
pub mod openai;
pub mod perplexity;
pub mod schema;
pub mod usage;

pub use anthropic::AnthropicConnector;
pub use bedrock::BedrockConnector;
pub use factory::{create_connector, create_connector_with, ConnectorOptions, ProviderKind};
pub use google::GoogleConnector;
pub use ollama::OllamaConnector;
pub use openai::OpenAiConnector;
pub use perplexity::PerplexityConnector;
pub use schema::{ObjectSchema, PropertySchema, SchemaError, SchemaType};
pub use usage::Usage;

/// Connector errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("ACCESS DENIED [{provider}]: {hint}")]
    Forbidden { provider: ProviderKind, hint: String },

    #[error("TRANSPORT FAILURE: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport failure outside reqwest, e.g. in the AWS SDK
    #[error("TRANSPORT FAILURE: {0}")]
    Network(String),

    #[error("MALFORMED RESPONSE: {0}")]
    MalformedResponse(String),

    #[error("TOOL SCHEMA REJECTED: {0}")]
    Schema(#[from] SchemaError),

    #[error("PROVIDER REJECTED ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("RATE LIMITED")]
    RateLimited,

    #[error("REQUEST CANCELLED")]
    Cancelled,

    #[error("UNKNOWN PROVIDER: {0}")]
    UnknownProvider(String),

    #[error("INVALID REQUEST: {0}")]
    InvalidRequest(String),
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::MalformedResponse(err.to_string())
    }
}

impl ConnectorError {
    pub(crate) fn forbidden(provider: ProviderKind) -> Self {
        ConnectorError::Forbidden {
            provider,
            hint: provider.credential_hint().to_string(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ConnectorError::MalformedResponse(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Prior conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-agnostic tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Parse the input schema into its typed form
    pub fn schema(&self) -> std::result::Result<ObjectSchema, SchemaError> {
        ObjectSchema::parse(&self.name, &self.input_schema)
    }
}

/// Default token budget of a single round
pub const DEFAULT_MAX_TOKENS: u32 = 400;

/// One round of model input. Built once, never mutated by a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub history: Vec<Message>,
    pub streaming: bool,
    pub max_tokens: u32,
    pub tools: BTreeMap<String, ToolSpec>,
}

impl QueryRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            history: Vec::new(),
            streaming: false,
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: BTreeMap::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: BTreeMap<String, ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Reject requests no backend could serve.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(ConnectorError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }
        if self.user_prompt.trim().is_empty() && self.history.is_empty() {
            return Err(ConnectorError::InvalidRequest(
                "user prompt is empty and there is no history to continue".to_string(),
            ));
        }
        Ok(())
    }

    /// History followed by the user prompt, in chat order. System turns in
    /// history are kept; adapters with a dedicated system slot filter them.
    pub fn conversation(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        if !self.user_prompt.is_empty() {
            messages.push(Message::user(self.user_prompt.clone()));
        }
        messages
    }
}

/// A single tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build from a raw JSON value. A null value means no arguments; strings
    /// are decoded as JSON text, as several backends encode arguments that way.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Result<Self> {
        let name = name.into();
        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            Value::String(text) if text.trim().is_empty() => Map::new(),
            Value::String(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => map,
                other => {
                    return Err(ConnectorError::malformed(format!(
                        "arguments for '{}' are not an object: {}",
                        name, other
                    )))
                }
            },
            other => {
                return Err(ConnectorError::malformed(format!(
                    "arguments for '{}' are not an object: {}",
                    name, other
                )))
            }
        };
        Ok(Self { name, arguments })
    }
}

/// Outcome of a tool-enabled round: text, optionally with one tool call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub text: String,
    pub tool_call: Option<ToolInvocation>,
}

impl QueryResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
        }
    }

    pub fn tool(
        text: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            text: text.into(),
            tool_call: Some(ToolInvocation::new(name, arguments)),
        }
    }

    pub fn is_tool_use(&self) -> bool {
        self.tool_call.is_some()
    }

    /// Keep the first call; later ones are dropped.
    pub(crate) fn from_calls(text: String, mut calls: Vec<ToolInvocation>, provider: ProviderKind) -> Self {
        if calls.len() > 1 {
            tracing::debug!(
                provider = %provider,
                dropped = calls.len() - 1,
                "model requested several tool calls, keeping the first"
            );
        }
        let tool_call = if calls.is_empty() {
            None
        } else {
            Some(calls.swap_remove(0))
        };
        Self { text, tool_call }
    }
}

/// Receives streamed text chunks as they arrive
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call collaborators: cancellation and the optional chunk sink
#[derive(Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub on_chunk: Option<StreamCallback>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: StreamCallback) -> Self {
        self.on_chunk = Some(sink);
        self
    }

    pub fn emit(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        if let Some(sink) = &self.on_chunk {
            sink(chunk);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("streaming_sink", &self.on_chunk.is_some())
            .finish()
    }
}

/// A language model backend
#[async_trait]
pub trait Connector: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn model(&self) -> String;

    /// Translate the catalogue into this backend's native declarations.
    fn declare_tools(&self, tools: &BTreeMap<String, ToolSpec>) -> Result<Vec<Value>>;

    /// One round without tools. With `request.streaming` set, chunks go to
    /// `ctx.on_chunk` while the full text is still returned.
    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String>;

    /// One round with the request's tool catalogue.
    async fn query_with_tool(&self, request: &QueryRequest, ctx: &CallContext)
        -> Result<QueryResult>;
}
