//! Adapter HTTP Tests
//!
//! Drives every adapter against a local mockito server: credential
//! failures, tool-call parsing, streaming into a sink and cancellation.

use mockito::{Matcher, Server};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use termagent_provider::{
    create_connector_with, CallContext, Connector, ConnectorError, ConnectorOptions, ProviderKind,
    QueryRequest, ToolSpec,
};
use tokio_util::sync::CancellationToken;

fn options(kind: ProviderKind, base_url: &str) -> ConnectorOptions {
    let mut options = ConnectorOptions::default().with_base_url(base_url);
    if kind != ProviderKind::Ollama {
        options.api_key = Some("test-key".to_string());
    }
    if kind == ProviderKind::Bedrock {
        options.secret_key = Some("test-secret".to_string());
        options.region = Some("us-east-1".to_string());
    }
    options
}

fn endpoint(kind: ProviderKind) -> Matcher {
    match kind {
        ProviderKind::OpenAi | ProviderKind::Perplexity => {
            Matcher::Exact("/chat/completions".to_string())
        }
        ProviderKind::Anthropic => Matcher::Exact("/v1/messages".to_string()),
        ProviderKind::Google => Matcher::Regex(r"^/models/.+:generateContent".to_string()),
        ProviderKind::Ollama => Matcher::Exact("/api/chat".to_string()),
        ProviderKind::Bedrock => Matcher::Regex(r"^/model/.+/converse$".to_string()),
    }
}

fn websearch_tools() -> BTreeMap<String, ToolSpec> {
    let mut tools = BTreeMap::new();
    tools.insert(
        "websearch".to_string(),
        ToolSpec::new(
            "websearch",
            "Search the web for current information.",
            json!({
                "type": "object",
                "properties": { "query": { "type": "string", "description": "Search terms" } },
                "required": ["query"]
            }),
        ),
    );
    tools
}

// ========== Credential Tests ==========

#[tokio::test]
async fn test_unauthorized_maps_to_forbidden_for_every_adapter() {
    for kind in ProviderKind::ALL {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", endpoint(kind))
            .with_status(401)
            .with_body(r#"{"error": {"message": "invalid key"}}"#)
            .create_async()
            .await;

        let connector = create_connector_with(kind, "", options(kind, &server.url())).unwrap();
        let err = connector
            .query(&QueryRequest::new("", "hello"), &CallContext::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, ConnectorError::Forbidden { provider, .. } if provider == kind),
            "{}: unexpected {:?}",
            kind,
            err
        );
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_missing_credentials_never_reach_the_network() {
    for kind in ProviderKind::ALL {
        let options = match kind {
            ProviderKind::Ollama => continue,
            // a key id without its secret; the AWS chain is never consulted
            ProviderKind::Bedrock => ConnectorOptions::default().with_api_key("AKID"),
            _ => ConnectorOptions::default(),
        };
        let connector = create_connector_with(kind, "", options).unwrap();
        let err = connector
            .query(&QueryRequest::new("", "hello"), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Forbidden { .. }), "{}", kind);
    }
}

#[tokio::test]
async fn test_server_error_maps_to_api() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body(r#"{"error": {"message": "upstream exploded"}}"#)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::OpenAi,
        "",
        options(ProviderKind::OpenAi, &server.url()),
    )
    .unwrap();
    let err = connector
        .query(&QueryRequest::new("", "hello"), &CallContext::new())
        .await
        .unwrap_err();
    match err {
        ConnectorError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/chat")
        .with_status(429)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Ollama,
        "",
        options(ProviderKind::Ollama, &server.url()),
    )
    .unwrap();
    let err = connector
        .query(&QueryRequest::new("", "hello"), &CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::RateLimited));
}

// ========== Tool Call Tests ==========

#[tokio::test]
async fn test_openai_tool_call_round() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(json!({
            "tool_choice": "auto",
            "tools": [{ "type": "function", "function": { "name": "websearch" } }]
        })))
        .with_status(200)
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "websearch", "arguments": "{\"query\":\"tokio\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": { "prompt_tokens": 50, "completion_tokens": 10 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::OpenAi,
        "gpt-4o-mini",
        options(ProviderKind::OpenAi, &server.url()),
    )
    .unwrap();
    let request = QueryRequest::new("sys", "look up tokio").with_tools(websearch_tools());
    let result = connector
        .query_with_tool(&request, &CallContext::new())
        .await
        .unwrap();

    let call = result.tool_call.unwrap();
    assert_eq!(call.name, "websearch");
    assert_eq!(call.arguments["query"], "tokio");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_text_round() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .with_status(200)
        .with_body(
            json!({
                "content": [{ "type": "text", "text": "The task is finished: 42." }],
                "stop_reason": "end_turn",
                "usage": { "input_tokens": 20, "output_tokens": 8 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Anthropic,
        "",
        options(ProviderKind::Anthropic, &server.url()),
    )
    .unwrap();
    let request = QueryRequest::new("sys", "answer").with_tools(websearch_tools());
    let result = connector
        .query_with_tool(&request, &CallContext::new())
        .await
        .unwrap();

    assert!(!result.is_tool_use());
    assert_eq!(result.text, "The task is finished: 42.");
}

#[tokio::test]
async fn test_bedrock_signed_tool_round() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", endpoint(ProviderKind::Bedrock))
        .match_header(
            "authorization",
            Matcher::Regex(r"^AWS4-HMAC-SHA256 Credential=test-key/\d{8}/us-east-1/bedrock/aws4_request".to_string()),
        )
        .match_header("x-amz-date", Matcher::Regex(r"^\d{8}T\d{6}Z$".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "system": [{ "text": "sys" }],
                "inferenceConfig": { "maxTokens": 400 }
            })),
            Matcher::Regex(r#""toolSpec""#.to_string()),
            Matcher::Regex(r#""name":"websearch""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "output": { "message": { "role": "assistant", "content": [
                    { "text": "Looking it up." },
                    { "toolUse": { "toolUseId": "t", "name": "websearch", "input": { "query": "aws" } } }
                ] } },
                "stopReason": "tool_use",
                "usage": { "inputTokens": 5, "outputTokens": 5, "totalTokens": 10 },
                "metrics": { "latencyMs": 12 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Bedrock,
        "",
        options(ProviderKind::Bedrock, &server.url()),
    )
    .unwrap();
    let request = QueryRequest::new("sys", "search aws").with_tools(websearch_tools());
    let result = connector
        .query_with_tool(&request, &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.text, "Looking it up.");
    assert_eq!(result.tool_call.unwrap().arguments["query"], "aws");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_bedrock_access_denied_is_forbidden() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", endpoint(ProviderKind::Bedrock))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_header("x-amzn-errortype", "UnrecognizedClientException")
        .with_body(r#"{"message":"The security token included in the request is invalid."}"#)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Bedrock,
        "",
        options(ProviderKind::Bedrock, &server.url()),
    )
    .unwrap();
    let err = connector
        .query(&QueryRequest::new("", "hello"), &CallContext::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConnectorError::Forbidden { provider: ProviderKind::Bedrock, .. }),
        "unexpected {:?}",
        err
    );
}

#[tokio::test]
async fn test_perplexity_prompted_tool_call() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(
            json!({
                "choices": [{ "message": {
                    "content": "Searching now. {\"tool\": \"websearch\", \"arguments\": {\"query\": \"sonar\"}}"
                } }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Perplexity,
        "",
        options(ProviderKind::Perplexity, &server.url()),
    )
    .unwrap();
    let request = QueryRequest::new("", "search").with_tools(websearch_tools());
    let result = connector
        .query_with_tool(&request, &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.text, "Searching now.");
    assert_eq!(result.tool_call.unwrap().arguments["query"], "sonar");
}

#[tokio::test]
async fn test_malformed_body() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", endpoint(ProviderKind::Google))
        .with_status(200)
        .with_body("this is not json")
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Google,
        "",
        options(ProviderKind::Google, &server.url()),
    )
    .unwrap();
    let err = connector
        .query(&QueryRequest::new("", "hello"), &CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::MalformedResponse(_)));
}

// ========== Streaming Tests ==========

fn collecting_context() -> (CallContext, Arc<Mutex<Vec<String>>>) {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let ctx = CallContext::new().with_sink(Arc::new(move |chunk: &str| {
        sink.lock().unwrap().push(chunk.to_string());
    }));
    (ctx, chunks)
}

#[tokio::test]
async fn test_openai_streaming_into_sink() {
    let mut server = Server::new_async().await;
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        "data: [DONE]",
    ]
    .join("\n\n");
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::OpenAi,
        "",
        options(ProviderKind::OpenAi, &server.url()),
    )
    .unwrap();
    let (ctx, chunks) = collecting_context();
    let text = connector
        .query(&QueryRequest::new("", "greet").with_streaming(true), &ctx)
        .await
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(*chunks.lock().unwrap(), vec!["Hel".to_string(), "lo".to_string()]);
}

#[tokio::test]
async fn test_ollama_ndjson_streaming() {
    let mut server = Server::new_async().await;
    let body = [
        r#"{"message":{"role":"assistant","content":"4"},"done":false}"#,
        r#"{"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":7,"eval_count":1}"#,
    ]
    .join("\n");
    server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Ollama,
        "",
        options(ProviderKind::Ollama, &server.url()),
    )
    .unwrap();
    let (ctx, chunks) = collecting_context();
    let text = connector
        .query(&QueryRequest::new("", "2+2").with_streaming(true), &ctx)
        .await
        .unwrap();

    assert_eq!(text, "4");
    assert_eq!(*chunks.lock().unwrap(), vec!["4".to_string()]);
}

#[tokio::test]
async fn test_streaming_disabled_leaves_sink_untouched() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(json!({ "content": [{ "type": "text", "text": "quiet" }] }).to_string())
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Anthropic,
        "",
        options(ProviderKind::Anthropic, &server.url()),
    )
    .unwrap();
    let (ctx, chunks) = collecting_context();
    let text = connector
        .query(&QueryRequest::new("", "hi"), &ctx)
        .await
        .unwrap();

    assert_eq!(text, "quiet");
    assert!(chunks.lock().unwrap().is_empty());
}

// ========== Transport Tests ==========

/// An address nothing listens on
async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_connection_refused_is_transport() {
    let url = closed_port().await;
    for kind in [ProviderKind::OpenAi, ProviderKind::Ollama] {
        let connector = create_connector_with(kind, "", options(kind, &url)).unwrap();
        let err = connector
            .query(&QueryRequest::new("", "hello"), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Transport(_)), "{}: unexpected {:?}", kind, err);
        assert!(err.to_string().starts_with("TRANSPORT FAILURE"));
    }
}

#[tokio::test]
async fn test_bedrock_connection_refused_is_network() {
    let url = closed_port().await;
    let connector = create_connector_with(
        ProviderKind::Bedrock,
        "",
        options(ProviderKind::Bedrock, &url),
    )
    .unwrap();
    let err = connector
        .query(&QueryRequest::new("", "hello"), &CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Network(_)), "unexpected {:?}", err);
    assert!(err.to_string().starts_with("TRANSPORT FAILURE"));
}

// ========== Cancellation Tests ==========

#[tokio::test]
async fn test_cancelled_before_send() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body(r#"{"message":{"content":"late"},"done":true}"#)
        .expect_at_most(1)
        .create_async()
        .await;

    let connector = create_connector_with(
        ProviderKind::Ollama,
        "",
        options(ProviderKind::Ollama, &server.url()),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = connector
        .query(
            &QueryRequest::new("", "hi"),
            &CallContext::new().with_cancel(cancel),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Cancelled));
}
