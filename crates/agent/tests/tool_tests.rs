//! Registry, built-in tools and direct tool runs

mod common;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use termagent_agent::tools::{builtin_tools, Tool, ToolContext, ToolError, ToolRegistry, ToolResult, WebSearchTool};
use termagent_agent::{Agent, AgentError, ErrorKind, Operator, SystemPrompts};
use termagent_config::ToolkitConfig;

use common::{args, ScriptedConnector};

struct Silent;

#[async_trait]
impl Operator for Silent {
    async fn ask(&self, _question: &str) -> ToolResult<String> {
        Ok(String::new())
    }

    async fn confirm(&self, _prompt: &str) -> ToolResult<bool> {
        Ok(true)
    }
}

fn ctx() -> ToolContext {
    ToolContext::new(Arc::new(Silent))
}

struct Labelled {
    name: &'static str,
    label: &'static str,
}

#[async_trait]
impl Tool for Labelled {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.label
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _args: Map<String, Value>, _ctx: &ToolContext) -> ToolResult<String> {
        Ok(self.label.to_string())
    }
}

// ========== Registry Tests ==========

#[tokio::test]
async fn test_last_registration_wins() {
    let mut registry = ToolRegistry::new();
    registry.register(Labelled { name: "gadget", label: "first" });
    registry.register(Labelled { name: "gadget", label: "second" });

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("gadget").unwrap().description(), "second");
    assert_eq!(registry.specs()["gadget"].description, "second");
    assert_eq!(
        registry.execute("gadget", Map::new(), &ctx()).await.unwrap(),
        "second"
    );
}

#[tokio::test]
async fn test_missing_tool_is_not_found() {
    let registry = ToolRegistry::new();
    let err = registry.execute("frobnicate", Map::new(), &ctx()).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(name) if name == "frobnicate"));
}

#[test]
fn test_builtin_tools() {
    let registry = builtin_tools(&ToolkitConfig::default());
    assert_eq!(registry.names(), vec!["unix".to_string(), "websearch".to_string()]);
    for spec in registry.specs().values() {
        assert!(spec.schema().is_ok(), "{} has an undeclarable schema", spec.name);
    }
}

#[tokio::test]
async fn test_unix_refusals_are_invalid_arguments() {
    let registry = builtin_tools(&ToolkitConfig::default());
    for command in ["sudo ls", "rm -rf /tmp/x", "ls; sudo reboot"] {
        let err = registry
            .execute("unix", args(json!({ "command": command })), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)), "{}", command);
    }
}

#[tokio::test]
async fn test_wrong_argument_type_rejected() {
    let registry = builtin_tools(&ToolkitConfig::default());
    let err = registry
        .execute("websearch", args(json!({ "query": 7 })), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
}

// ========== WebSearch Tests ==========

#[tokio::test]
async fn test_websearch_against_mock_server() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("q".into(), "rust async".into()),
            mockito::Matcher::UrlEncoded("format".into(), "json".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/x-javascript")
        .with_body(
            json!({
                "Results": [{ "Heading": "Tokio", "FirstURL": "https://tokio.rs" }],
                "RelatedTopics": [
                    { "Text": "async-std", "FirstURL": "https://async.rs" },
                    { "Text": "smol", "FirstURL": "https://github.com/smol-rs/smol" }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let tool = WebSearchTool::new(2).with_endpoint(format!("{}/", server.url()));
    let output = tool
        .run(args(json!({ "query": "rust async" })), &ctx())
        .await
        .unwrap();

    assert_eq!(output, "- [Tokio](https://tokio.rs)\n- [async-std](https://async.rs)");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_websearch_http_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let tool = WebSearchTool::new(5).with_endpoint(server.url());
    let err = tool
        .run(args(json!({ "query": "anything" })), &ctx())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_websearch_nothing_found() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"Results":[],"RelatedTopics":[]}"#)
        .create_async()
        .await;

    let tool = WebSearchTool::new(5).with_endpoint(server.url());
    let output = tool.run(args(json!({ "query": "zzzz" })), &ctx()).await.unwrap();
    assert_eq!(output, "No results found.");
}

// ========== Direct Runs ==========

fn agent() -> Agent {
    let connector = Arc::new(ScriptedConnector::new(vec![], "unused"));
    Agent::new(connector, builtin_tools(&ToolkitConfig::default()))
        .with_prompts(SystemPrompts::render("HEADER", None, None))
        .with_operator(Arc::new(Silent))
}

#[test]
fn test_tool_help() {
    let agent = agent();
    let help = agent.tool_help("unix").unwrap();
    assert!(help.starts_with("unix: Execute Unix commands."));
    assert!(help.contains("command"));

    let err = agent.tool_help("final_answer").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolNotFound);
}

#[tokio::test]
async fn test_run_tool_errors_map_to_kinds() {
    let agent = agent();

    let err = agent
        .run_tool("frobnicate", Map::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ToolNotFound(_)));

    let err = agent
        .run_tool("unix", Map::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
}

#[tokio::test]
async fn test_run_tool_executes_command() {
    let output = agent()
        .run_tool("unix", args(json!({ "command": "pwd" })), CancellationToken::new())
        .await
        .unwrap();
    assert!(output.starts_with('/'));
}
