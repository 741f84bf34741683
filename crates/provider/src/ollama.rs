//! Ollama adapter (local models over the `/api/chat` endpoint)

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::http;
use crate::{
    CallContext, Connector, ConnectorError, ConnectorOptions, ObjectSchema, ProviderKind,
    QueryRequest, QueryResult, Result, ToolInvocation, ToolSpec, Usage,
};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Ollama connector
pub struct OllamaConnector {
    client: Client,
    host: String,
    model: String,
}

impl OllamaConnector {
    pub fn new(model: impl Into<String>, options: ConnectorOptions) -> Self {
        let host = options
            .base_url
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        // OLLAMA_HOST is often given without a scheme.
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("http://{}", host)
        };
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn build_request(&self, request: &QueryRequest, tools: Option<Vec<Value>>, stream: bool) -> Value {
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
            "stream": stream,
            "options": { "num_predict": request.max_tokens },
        });
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(json: &Value) -> Result<(QueryResult, Usage)> {
        if let Some(error) = json["error"].as_str() {
            return Err(ConnectorError::Api {
                status: 200,
                message: error.to_string(),
            });
        }
        let message = json
            .get("message")
            .ok_or_else(|| ConnectorError::malformed("response has no message"))?;
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
            QueryResult::from_calls(text, calls, ProviderKind::Ollama),
            parse_usage(json),
        ))
    }

    async fn post(&self, body: &Value, ctx: &CallContext) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.host);
        trace!(url = %url, "posting ollama chat");
        let request = self.client.post(&url).json(body);
        let response = http::send(ctx, request).await?;
        http::check_status(ProviderKind::Ollama, response).await
    }

    async fn read_stream(&self, response: reqwest::Response, ctx: &CallContext) -> Result<(String, Usage)> {
        let mut lines = http::lines(response);
        let mut text = String::new();
        let mut usage = Usage::default();

        while let Some(line) = lines.next_line(&ctx.cancel).await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Value = serde_json::from_str(&line)?;
            if let Some(error) = event["error"].as_str() {
                return Err(ConnectorError::Api {
                    status: 200,
                    message: error.to_string(),
                });
            }
            if let Some(chunk) = event["message"]["content"].as_str() {
                ctx.emit(chunk);
                text.push_str(chunk);
            }
            if event["done"].as_bool().unwrap_or(false) {
                usage = parse_usage(&event);
                break;
            }
        }
        Ok((text, usage))
    }
}

fn parse_usage(json: &Value) -> Usage {
    Usage::new(
        json["prompt_eval_count"].as_u64().unwrap_or(0),
        json["eval_count"].as_u64().unwrap_or(0),
    )
}

#[async_trait]
impl Connector for OllamaConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
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
        let body = self.build_request(request, None, request.streaming);
        let response = self.post(&body, ctx).await?;

        let (text, usage) = if request.streaming {
            self.read_stream(response, ctx).await?
        } else {
            let json = http::read_json(ctx, response).await?;
            let (result, usage) = Self::parse_response(&json)?;
            (result.text, usage)
        };
        usage.log(ProviderKind::Ollama, &self.model);
        Ok(text)
    }

    async fn query_with_tool(
        &self,
        request: &QueryRequest,
        ctx: &CallContext,
    ) -> Result<QueryResult> {
        request.validate()?;
        let tools = self.declare_tools(&request.tools)?;
        let body = self.build_request(request, Some(tools), false);

        let response = self.post(&body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::Ollama, &self.model);
        debug!(tool = ?result.tool_call.as_ref().map(|c| &c.name), "ollama round complete");
        Ok(result)
    }
}
