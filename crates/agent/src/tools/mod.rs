//! Tool trait, registry and the built-in tools

pub mod shell;
pub mod synthetic;
pub mod web;

pub use shell::UnixTool;
pub use synthetic::{FinalAnswerTool, UserClarificationTool};
pub use web::WebSearchTool;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use termagent_provider::{ObjectSchema, SchemaError, ToolSpec};

use crate::operator::Operator;

/// Tool failures
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("TOOL NOT FOUND: {0}")]
    NotFound(String),

    #[error("INVALID ARGUMENTS: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("TIMED OUT AFTER {0} SECONDS")]
    Timeout(u64),

    #[error("CANCELLED")]
    Cancelled,

    #[error("IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("TRANSPORT FAILURE: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<SchemaError> for ToolError {
    fn from(err: SchemaError) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Collaborators handed to every tool run
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub operator: Arc<dyn Operator>,
}

impl ToolContext {
    pub fn new(operator: Arc<dyn Operator>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            operator,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A named capability the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-Schema-like object describing the arguments
    fn input_schema(&self) -> Value;

    fn help_text(&self) -> String {
        default_help(self.name(), self.description(), &self.input_schema())
    }

    async fn run(&self, args: Map<String, Value>, ctx: &ToolContext) -> ToolResult<String>;
}

/// `name: description` followed by one line per parameter
pub fn default_help(name: &str, description: &str, schema: &Value) -> String {
    let mut help = format!("{}: {}", name, description.trim());
    let Ok(parsed) = ObjectSchema::parse(name, schema) else {
        return help;
    };
    if parsed.properties.is_empty() {
        return help;
    }
    help.push_str("\n\nParameters:");
    for prop in &parsed.properties {
        let required = if parsed.is_required(&prop.name) {
            " (required)"
        } else {
            ""
        };
        help.push_str(&format!("\n  {} <{}>{}", prop.name, prop.kind, required));
        if !prop.description.is_empty() {
            help.push_str(&format!(": {}", prop.description));
        }
    }
    help
}

/// Argument check against a tool's schema: required keys present, declared
/// keys of the declared type, enum members respected.
pub fn validate_arguments(
    tool: &str,
    schema: &Value,
    args: &Map<String, Value>,
) -> ToolResult<()> {
    let schema = ObjectSchema::parse(tool, schema)?;
    for name in &schema.required {
        if !args.contains_key(name) {
            return Err(ToolError::InvalidArguments(format!(
                "missing required argument '{}'",
                name
            )));
        }
    }
    for (name, value) in args {
        let Some(prop) = schema.property(name) else {
            continue;
        };
        if !prop.kind.matches(value) {
            return Err(ToolError::InvalidArguments(format!(
                "argument '{}' must be of type {}",
                name, prop.kind
            )));
        }
        let in_enum = value
            .as_str()
            .is_some_and(|v| prop.enum_values.iter().any(|e| e == v));
        if !prop.enum_values.is_empty() && !in_enum {
            return Err(ToolError::InvalidArguments(format!(
                "argument '{}' must be one of: {}",
                name,
                prop.enum_values.join(", ")
            )));
        }
    }
    Ok(())
}

/// Name to tool map. Read-only once the agent is built.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn all(&self) -> &BTreeMap<String, Arc<dyn Tool>> {
        &self.tools
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Provider-neutral declarations of every registered tool
    pub fn specs(&self) -> BTreeMap<String, ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                (
                    name.clone(),
                    ToolSpec::new(name.clone(), tool.description(), tool.input_schema()),
                )
            })
            .collect()
    }

    /// Look up, validate and run one tool.
    pub async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> ToolResult<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        validate_arguments(name, &tool.input_schema(), &args)?;
        debug!(tool = %name, "running tool");
        tool.run(args, ctx).await
    }
}

/// Built-in tools configured from the toolkit section of the config
pub fn builtin_tools(config: &termagent_config::ToolkitConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(UnixTool::from_config(&config.unix));
    registry.register(WebSearchTool::from_config(&config.websearch));
    registry
}
