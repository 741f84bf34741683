//! Google Gemini adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::http::{self, sse_data};
use crate::{
    CallContext, Connector, ConnectorError, ConnectorOptions, ObjectSchema, ProviderKind,
    QueryRequest, QueryResult, Result, Role, SchemaType, ToolInvocation, ToolSpec, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini connector
pub struct GoogleConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

/// Gemini type tags are upper case
fn gemini_type(kind: SchemaType) -> &'static str {
    match kind {
        SchemaType::String => "STRING",
        SchemaType::Integer => "INTEGER",
        SchemaType::Number => "NUMBER",
        SchemaType::Boolean => "BOOLEAN",
        SchemaType::Array => "ARRAY",
        SchemaType::Object => "OBJECT",
    }
}

/// Render a parsed schema in Gemini's OpenAPI subset
fn gemini_schema(schema: &ObjectSchema) -> Value {
    let mut properties = Map::new();
    for prop in &schema.properties {
        let mut entry = json!({ "type": gemini_type(prop.kind) });
        if !prop.description.is_empty() {
            entry["description"] = json!(prop.description);
        }
        if let Some(items) = prop.items {
            entry["items"] = json!({ "type": gemini_type(items) });
        }
        if !prop.enum_values.is_empty() {
            entry["format"] = json!("enum");
            entry["enum"] = json!(prop.enum_values);
        }
        properties.insert(prop.name.clone(), entry);
    }
    let mut rendered = json!({ "type": "OBJECT", "properties": properties });
    if !schema.required.is_empty() {
        rendered["required"] = json!(schema.required);
    }
    rendered
}

impl GoogleConnector {
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
        let mut contents = Vec::new();
        for message in request.conversation() {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&message.content);
                    continue;
                }
            };
            contents.push(json!({ "role": role, "parts": [{ "text": message.content }] }));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": request.max_tokens },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if let Some(declarations) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }

    fn parse_response(json: &Value) -> Result<(QueryResult, Usage)> {
        let candidate = match json["candidates"].get(0) {
            Some(candidate) => candidate,
            None => {
                let reason = json["promptFeedback"]["blockReason"]
                    .as_str()
                    .map(|r| format!("prompt blocked: {}", r))
                    .unwrap_or_else(|| "response has no candidates".to_string());
                return Err(ConnectorError::malformed(reason));
            }
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(chunk) = part["text"].as_str() {
                    text.push_str(chunk);
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call["name"]
                        .as_str()
                        .ok_or_else(|| ConnectorError::malformed("functionCall without a name"))?;
                    calls.push(ToolInvocation::from_value(name, call["args"].clone())?);
                }
            }
        }

        Ok((
            QueryResult::from_calls(text, calls, ProviderKind::Google),
            parse_usage(&json["usageMetadata"]),
        ))
    }

    async fn post(&self, method: &str, body: &Value, ctx: &CallContext) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ConnectorError::forbidden(ProviderKind::Google))?;
        let url = format!("{}/models/{}:{}", self.base_url, self.model, method);
        trace!(url = %url, "posting gemini request");

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(body);
        let response = http::send(ctx, request).await?;
        http::check_status(ProviderKind::Google, response).await
    }

    async fn read_stream(&self, response: reqwest::Response, ctx: &CallContext) -> Result<(String, Usage)> {
        let mut lines = http::lines(response);
        let mut text = String::new();
        let mut usage = Usage::default();

        while let Some(line) = lines.next_line(&ctx.cancel).await? {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            let event: Value = serde_json::from_str(data)?;
            if let Some(error) = event.get("error") {
                return Err(ConnectorError::Api {
                    status: error["code"].as_u64().unwrap_or(200) as u16,
                    message: error["message"].as_str().unwrap_or("stream error").to_string(),
                });
            }
            usage.absorb(parse_usage(&event["usageMetadata"]));
            let parts = event["candidates"][0]["content"]["parts"].as_array();
            for part in parts.into_iter().flatten() {
                if let Some(chunk) = part["text"].as_str() {
                    ctx.emit(chunk);
                    text.push_str(chunk);
                }
            }
        }
        Ok((text, usage))
    }
}

fn parse_usage(meta: &Value) -> Usage {
    Usage::new(
        meta["promptTokenCount"].as_u64().unwrap_or(0),
        meta["candidatesTokenCount"].as_u64().unwrap_or(0),
    )
}

#[async_trait]
impl Connector for GoogleConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn declare_tools(&self, tools: &BTreeMap<String, ToolSpec>) -> Result<Vec<Value>> {
        tools
            .values()
            .map(|tool| {
                let schema = ObjectSchema::parse(&tool.name, &tool.input_schema)?;
                let mut declaration = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                // Gemini rejects OBJECT parameters with no properties.
                if !schema.properties.is_empty() {
                    declaration["parameters"] = gemini_schema(&schema);
                }
                Ok(declaration)
            })
            .collect()
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        request.validate()?;
        let body = self.build_request(request, None);

        if request.streaming {
            let response = self
                .post("streamGenerateContent?alt=sse", &body, ctx)
                .await?;
            let (text, usage) = self.read_stream(response, ctx).await?;
            usage.log(ProviderKind::Google, &self.model);
            return Ok(text);
        }

        let response = self.post("generateContent", &body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::Google, &self.model);
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

        let response = self.post("generateContent", &body, ctx).await?;
        let json = http::read_json(ctx, response).await?;
        let (result, usage) = Self::parse_response(&json)?;
        usage.log(ProviderKind::Google, &self.model);
        debug!(tool = ?result.tool_call.as_ref().map(|c| &c.name), "gemini round complete");
        Ok(result)
    }
}
