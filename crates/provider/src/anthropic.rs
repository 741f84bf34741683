//! Anthropic Messages adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::http::{self, sse_data};
use crate::{
    CallContext, Connector, ConnectorError, ConnectorOptions, ObjectSchema, ProviderKind,
    QueryRequest, QueryResult, Result, Role, ToolInvocation, ToolSpec, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic connector
pub struct AnthropicConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl AnthropicConnector {
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

    fn build_request(&self, request: &QueryRequest, tools: Option<Vec<Value>>) -> Value {
        // The Messages API has no system role inside `messages`.
        let mut system = request.system_prompt.clone();
        let mut messages = Vec::new();
        for message in request.conversation() {
            if message.role == Role::System {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&message.content);
                continue;
            }
            messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(json: &Value) -> Result<(QueryResult, Usage)> {
        let content = json["content"]
            .as_array()
            .ok_or_else(|| ConnectorError::malformed("response has no content blocks"))?;

        let mut text = String::new();
        let mut calls = Vec::new();
        for block in content {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => {
                    let name = block["name"]
                        .as_str()
                        .ok_or_else(|| ConnectorError::malformed("tool_use block without a name"))?;
                    calls.push(ToolInvocation::from_value(name, block["input"].clone())?);
                }
                other => trace!(block_type = ?other, "ignoring content block"),
            }
        }

        let usage = Usage::new(
            json["usage"]["input_tokens"].as_u64().unwrap_or(0),
            json["usage"]["output_tokens"].as_u64().unwrap_or(0),
        );
        Ok((QueryResult::from_calls(text, calls, ProviderKind::Anthropic), usage))
    }

    async fn post(&self, body: &Value, ctx: &CallContext) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ConnectorError::forbidden(ProviderKind::Anthropic))?;
        let url = format!("{}/v1/messages", self.base_url);

        let request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body);
        let response = http::send(ctx, request).await?;
        http::check_status(ProviderKind::Anthropic, response).await
    }

    async fn read_stream(&self, response: reqwest::Response, ctx: &CallContext) -> Result<(String, Usage)> {
        let mut lines = http::lines(response);
        let mut state = StreamState::default();

        while let Some(line) = lines.next_line(&ctx.cancel).await? {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            if data == "[DONE]" {
                break;
            }
            let event: Value = serde_json::from_str(data)?;
            if let Some(chunk) = state.apply(&event)? {
                ctx.emit(&chunk);
            }
            if state.finished {
                break;
            }
        }
        Ok((state.text, state.usage))
    }
}

/// Accumulates text and usage across SSE events
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    usage: Usage,
    finished: bool,
}

impl StreamState {
    fn apply(&mut self, event: &Value) -> Result<Option<String>> {
        match event["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.absorb(Usage::new(
                    usage["input_tokens"].as_u64().unwrap_or(0),
                    usage["output_tokens"].as_u64().unwrap_or(0),
                ));
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                if delta["type"] == "text_delta" {
                    if let Some(chunk) = delta["text"].as_str() {
                        self.text.push_str(chunk);
                        return Ok(Some(chunk.to_string()));
                    }
                }
            }
            "message_delta" => {
                self.usage.absorb(Usage::new(
                    0,
                    event["usage"]["output_tokens"].as_u64().unwrap_or(0),
                ));
            }
            "message_stop" => self.finished = true,
            "error" => {
                return Err(ConnectorError::Api {
                    status: 200,
                    message: event["error"]["message"]
                        .as_str()
                        .unwrap_or("stream error")
                        .to_string(),
                })
            }
            other => trace!(event_type = other, "unhandled stream event"),
        }
        Ok(None)
    }
}

#[async_trait]
impl Connector for AnthropicConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": schema.to_json_schema(),
                }))
            })
            .collect()
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        request.validate()?;
        let mut body = self.build_request(request, None);

        if request.streaming {
            body["stream"] = json!(true);
            let response = self.post(&body, ctx).await?;
            let (text, usage) = self.read_stream(response, ctx).await?;
            usage.log(ProviderKind::Anthropic, &self.model);
            return Ok(text);
        }

        let response = self.post(&body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::Anthropic, &self.model);
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
        usage.log(ProviderKind::Anthropic, &self.model);
        debug!(
            stop_reason = json["stop_reason"].as_str().unwrap_or_default(),
            tool = ?result.tool_call.as_ref().map(|c| &c.name),
            "anthropic round complete"
        );
        Ok(result)
    }
}
