//! Perplexity adapter
//!
//! Perplexity speaks the chat-completions wire format but has no function
//! calling. Tool use is prompted instead: the catalogue is rendered into the
//! system prompt and the reply is scanned for the first JSON object of the
//! form `{"tool": "...", "arguments": {...}}`.

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

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

const TOOL_INSTRUCTIONS: &str = "You can call exactly one of the tools listed below. \
To call a tool, reply with a single JSON object of the form \
{\"tool\": \"<tool name>\", \"arguments\": {<arguments matching the tool parameters>}} \
and nothing else inside that object. If no tool is needed, answer in plain text.";

/// Perplexity connector
pub struct PerplexityConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl PerplexityConnector {
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
        let mut system = request.system_prompt.clone();
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&render_catalogue(&tools));
        }

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in request.conversation() {
            messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
        }

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        })
    }

    fn parse_response(json: &Value) -> Result<(String, Usage)> {
        let text = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| ConnectorError::malformed("response has no message content"))?;
        if let Some(citations) = json["citations"].as_array() {
            debug!(count = citations.len(), "perplexity citations");
        }
        Ok((text.to_string(), parse_usage(&json["usage"])))
    }

    async fn post(&self, body: &Value, ctx: &CallContext) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ConnectorError::forbidden(ProviderKind::Perplexity))?;
        let url = format!("{}/chat/completions", self.base_url);
        trace!(url = %url, "posting perplexity request");

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body);
        let response = http::send(ctx, request).await?;
        http::check_status(ProviderKind::Perplexity, response).await
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
            if event["usage"].is_object() {
                usage.absorb(parse_usage(&event["usage"]));
            }
            if let Some(chunk) = event["choices"]
                .get(0)
                .and_then(|c| c["delta"]["content"].as_str())
            {
                ctx.emit(chunk);
                text.push_str(chunk);
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

fn render_catalogue(tools: &[Value]) -> String {
    let mut out = String::from(TOOL_INSTRUCTIONS);
    out.push_str("\n\nAvailable tools:");
    for tool in tools {
        out.push_str(&format!(
            "\n- {}: {}\n  parameters: {}",
            tool["name"].as_str().unwrap_or_default(),
            tool["description"].as_str().unwrap_or_default(),
            tool["parameters"]
        ));
    }
    out
}

/// Balanced top-level `{...}` spans, in order of appearance. Braces inside
/// JSON strings are ignored.
pub(crate) fn json_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

/// First `{"tool": ..., "arguments": ...}` object with a non-empty tool
/// name, declared or not. Undeclared names surface later as not found.
/// The remaining text is kept as the model's commentary.
pub(crate) fn extract_tool_call(
    text: &str,
    declared: &BTreeMap<String, ToolSpec>,
) -> Result<Option<(ToolInvocation, String)>> {
    for candidate in json_objects(text) {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        let Some(name) = value["tool"].as_str().filter(|n| !n.is_empty()) else {
            continue;
        };
        if !declared.contains_key(name) {
            trace!(tool = name, "reply names an undeclared tool");
        }
        let call = ToolInvocation::from_value(name, value["arguments"].clone())?;
        let commentary = text.replacen(candidate, "", 1).trim().to_string();
        return Ok(Some((call, commentary)));
    }
    Ok(None)
}

#[async_trait]
impl Connector for PerplexityConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Perplexity
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
                    "parameters": schema.to_json_schema(),
                }))
            })
            .collect()
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        request.validate()?;
        let mut body = self.build_request(request, None);

        let (text, usage) = if request.streaming {
            body["stream"] = json!(true);
            let response = self.post(&body, ctx).await?;
            self.read_stream(response, ctx).await?
        } else {
            let response = self.post(&body, ctx).await?;
            let json = http::read_json(ctx, response).await?;
            Self::parse_response(&json)?
        };
        usage.log(ProviderKind::Perplexity, &self.model);
        Ok(text)
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
        let (text, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::Perplexity, &self.model);

        match extract_tool_call(&text, &request.tools)? {
            Some((call, commentary)) => {
                debug!(tool = %call.name, "perplexity round requested a tool");
                Ok(QueryResult {
                    text: commentary,
                    tool_call: Some(call),
                })
            }
            None => Ok(QueryResult::text(text)),
        }
    }
}
