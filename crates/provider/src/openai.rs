//! OpenAI Chat Completions adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::http::{self, sse_data};
use crate::{
    CallContext, Connector, ConnectorError, ConnectorOptions, ObjectSchema, ProviderKind,
    QueryRequest, QueryResult, Result, ToolInvocation, ToolSpec, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI connector
pub struct OpenAiConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiConnector {
    pub fn new(model: impl Into<String>, options: ConnectorOptions) -> Self {
        Self {
            client: Client::new(),
            api_key: options.api_key,
            base_url: options
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
        }
    }

    fn credential(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConnectorError::forbidden(ProviderKind::OpenAi))
    }

    fn build_request(&self, request: &QueryRequest, tools: Option<Vec<Value>>) -> Value {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt }));
        }
        for message in request.conversation() {
            messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn parse_response(json: &Value) -> Result<(QueryResult, Usage)> {
        let choice = json["choices"]
            .get(0)
            .ok_or_else(|| ConnectorError::malformed("response has no choices"))?;
        let message = &choice["message"];
        let text = message["content"].as_str().unwrap_or_default().to_string();

        let mut calls = Vec::new();
        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for call in tool_calls {
                let function = &call["function"];
                let name = function["name"]
                    .as_str()
                    .ok_or_else(|| ConnectorError::malformed("tool call without a name"))?;
                calls.push(ToolInvocation::from_value(name, function["arguments"].clone())?);
            }
        }

        Ok((
            QueryResult::from_calls(text, calls, ProviderKind::OpenAi),
            parse_usage(&json["usage"]),
        ))
    }

    async fn post(&self, body: &Value, ctx: &CallContext) -> Result<reqwest::Response> {
        let api_key = self.credential()?;
        let url = format!("{}/chat/completions", self.base_url);
        trace!(url = %url, "posting chat completion");

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body);
        let response = http::send(ctx, request).await?;
        http::check_status(ProviderKind::OpenAi, response).await
    }

    async fn read_stream(&self, response: reqwest::Response, ctx: &CallContext) -> Result<(String, Usage)> {
        let mut lines = http::lines(response);
        let mut text = String::new();
        let mut usage = Usage::default();

        while let Some(line) = lines.next_line(&ctx.cancel).await? {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            if data == "[DONE]" {
                break;
            }
            let event: Value = serde_json::from_str(data)?;
            if let Some(chunk) = stream_delta(&event, &mut usage)? {
                ctx.emit(&chunk);
                text.push_str(&chunk);
            }
        }
        Ok((text, usage))
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage::new(
        usage["prompt_tokens"].as_u64().unwrap_or(0),
        usage["completion_tokens"].as_u64().unwrap_or(0),
    )
}

/// Text carried by one streamed chunk
fn stream_delta(event: &Value, usage: &mut Usage) -> Result<Option<String>> {
    if let Some(error) = event.get("error") {
        return Err(ConnectorError::Api {
            status: 200,
            message: error["message"].as_str().unwrap_or("stream error").to_string(),
        });
    }
    if event["usage"].is_object() {
        usage.absorb(parse_usage(&event["usage"]));
    }
    Ok(event["choices"]
        .get(0)
        .and_then(|c| c["delta"]["content"].as_str())
        .map(str::to_string))
}

#[async_trait]
impl Connector for OpenAiConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn declare_tools(&self, tools: &BTreeMap<String, ToolSpec>) -> Result<Vec<Value>> {
        tools
            .values()
            .map(|tool| {
                let schema = ObjectSchema::parse(&tool.name, &tool.input_schema)?;
                Ok(json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": schema.to_json_schema(),
                    }
                }))
            })
            .collect()
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        request.validate()?;
        let mut body = self.build_request(request, None);

        if request.streaming {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
            let response = self.post(&body, ctx).await?;
            let (text, usage) = self.read_stream(response, ctx).await?;
            usage.log(ProviderKind::OpenAi, &self.model);
            return Ok(text);
        }

        let response = self.post(&body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::OpenAi, &self.model);
        Ok(result.text)
    }

    async fn query_with_tool(
        &self,
        request: &QueryRequest,
        ctx: &CallContext,
    ) -> Result<QueryResult> {
        request.validate()?;
        let tools = self.declare_tools(&request.tools)?;
        let body = self.build_request(request, Some(tools));

        let response = self.post(&body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::OpenAi, &self.model);
        debug!(tool = ?result.tool_call.as_ref().map(|c| &c.name), "openai round complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn connector() -> OpenAiConnector {
        OpenAiConnector::new("gpt-4o-mini", ConnectorOptions::default().with_api_key("sk-test"))
    }

    fn unix_tool() -> BTreeMap<String, ToolSpec> {
        let mut tools = BTreeMap::new();
        tools.insert(
            "unix".to_string(),
            ToolSpec::new(
                "unix",
                "Run a command",
                json!({
                    "type": "object",
                    "properties": { "command": { "type": "string", "description": "Command line" } },
                    "required": ["command"]
                }),
            ),
        );
        tools
    }

    // ========== Request Tests ==========

    #[test]
    fn test_build_request_messages() {
        let request = QueryRequest::new("be brief", "hi")
            .with_history(vec![Message::user("earlier"), Message::assistant("reply")])
            .with_max_tokens(123);
        let body = connector().build_request(&request, None);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 123);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(messages[3], json!({"role": "user", "content": "hi"}));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_declare_tools_function_format() {
        let tools = connector().declare_tools(&unix_tool()).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "unix");
        assert_eq!(tools[0]["function"]["parameters"]["required"], json!(["command"]));
    }

    #[test]
    fn test_build_request_with_tools() {
        let c = connector();
        let request = QueryRequest::new("", "list files").with_tools(unix_tool());
        let tools = c.declare_tools(&request.tools).unwrap();
        let body = c.build_request(&request, Some(tools));
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    // ========== Response Tests ==========

    #[test]
    fn test_parse_text_response() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 2 }
        });
        let (result, usage) = OpenAiConnector::parse_response(&json).unwrap();
        assert_eq!(result, QueryResult::text("hello"));
        assert_eq!(usage, Usage::new(5, 2));
    }

    #[test]
    fn test_parse_tool_call_response() {
        let json = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [
                    { "id": "1", "type": "function", "function": { "name": "unix", "arguments": "{\"command\":\"ls\"}" } },
                    { "id": "2", "type": "function", "function": { "name": "websearch", "arguments": "{}" } }
                ]
            } }]
        });
        let (result, _) = OpenAiConnector::parse_response(&json).unwrap();
        let call = result.tool_call.unwrap();
        assert_eq!(call.name, "unix");
        assert_eq!(call.arguments["command"], "ls");
        assert_eq!(result.text, "");
    }

    #[test]
    fn test_parse_empty_choices() {
        assert!(matches!(
            OpenAiConnector::parse_response(&json!({"choices": []})),
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_bad_arguments() {
        let json = json!({
            "choices": [{ "message": { "tool_calls": [
                { "function": { "name": "unix", "arguments": "{not json" } }
            ] } }]
        });
        assert!(OpenAiConnector::parse_response(&json).is_err());
    }

    #[test]
    fn test_stream_delta() {
        let mut usage = Usage::default();
        let event = json!({"choices": [{"delta": {"content": "Hel"}}]});
        assert_eq!(stream_delta(&event, &mut usage).unwrap().as_deref(), Some("Hel"));

        let last = json!({"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 4}});
        assert_eq!(stream_delta(&last, &mut usage).unwrap(), None);
        assert_eq!(usage, Usage::new(3, 4));

        let err = json!({"error": {"message": "overloaded"}});
        assert!(stream_delta(&err, &mut usage).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_is_forbidden() {
        let c = OpenAiConnector::new("gpt-4o-mini", ConnectorOptions::default());
        let err = c
            .query(&QueryRequest::new("", "hi"), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Forbidden { provider: ProviderKind::OpenAi, .. }));
    }
}
