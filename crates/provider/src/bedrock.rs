//! AWS Bedrock adapter (Converse API)
//!
//! Built on the AWS SDK. Credentials come from the standard chain
//! (environment, shared profiles, SSO, container and instance roles) unless
//! an explicit key pair is supplied. Tool rounds use `Converse`; streaming
//! questions use `ConverseStream`.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::config::http::HttpResponse;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ConversationRole, ConverseOutput as OutputKind,
    ConverseStreamOutput as StreamEvent, InferenceConfiguration, Message as SdkMessage,
    SystemContentBlock, TokenUsage, Tool, ToolConfiguration, ToolInputSchema, ToolSpecification,
};
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::{Document, Number};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::{
    CallContext, Connector, ConnectorError, ConnectorOptions, ObjectSchema, ProviderKind,
    QueryRequest, QueryResult, Result, Role, ToolInvocation, ToolSpec, Usage,
};

pub const DEFAULT_REGION: &str = "us-east-1";
const MAX_ATTEMPTS: u32 = 3;

/// Bedrock connector
pub struct BedrockConnector {
    access_key: Option<String>,
    secret_key: Option<String>,
    session_token: Option<String>,
    profile: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    model: String,
    client: OnceCell<Client>,
}

impl BedrockConnector {
    pub fn new(model: impl Into<String>, options: ConnectorOptions) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            access_key: non_empty(options.api_key),
            secret_key: non_empty(options.secret_key),
            session_token: non_empty(options.session_token),
            profile: non_empty(options.profile),
            region: non_empty(options.region),
            endpoint: non_empty(options.base_url).map(|url| url.trim_end_matches('/').to_string()),
            model: model.into(),
            client: OnceCell::new(),
        }
    }

    /// Explicitly configured region; `None` defers to the AWS chain
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// A complete key pair, `None` to use the default chain. Half a pair is
    /// a configuration error.
    fn static_credentials(&self) -> Result<Option<Credentials>> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Ok(Some(Credentials::new(
                access.clone(),
                secret.clone(),
                self.session_token.clone(),
                None,
                "termagent",
            ))),
            (None, None) => Ok(None),
            _ => Err(ConnectorError::forbidden(ProviderKind::Bedrock)),
        }
    }

    async fn load_client(&self) -> Result<Client> {
        let explicit = self.static_credentials()?;
        let region = RegionProviderChain::first_try(self.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS));
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(credentials) = explicit {
            loader = loader.credentials_provider(credentials);
        }
        let sdk = loader.load().await;

        let provider = sdk
            .credentials_provider()
            .ok_or_else(|| ConnectorError::forbidden(ProviderKind::Bedrock))?;
        if let Err(e) = provider.provide_credentials().await {
            warn!(error = %DisplayErrorContext(&e), "no usable AWS credentials");
            return Err(ConnectorError::forbidden(ProviderKind::Bedrock));
        }

        let mut config = aws_sdk_bedrockruntime::config::Builder::from(&sdk);
        if let Some(endpoint) = &self.endpoint {
            config = config.endpoint_url(endpoint);
        }
        debug!(region = ?sdk.region(), endpoint = ?self.endpoint, "bedrock client ready");
        Ok(Client::from_conf(config.build()))
    }

    /// The SDK client, built on first use
    async fn client(&self, ctx: &CallContext) -> Result<&Client> {
        cancellable(ctx, self.client.get_or_try_init(|| self.load_client())).await
    }

    fn build_messages(request: &QueryRequest) -> Result<(Vec<SystemContentBlock>, Vec<SdkMessage>)> {
        let mut system = Vec::new();
        if !request.system_prompt.is_empty() {
            system.push(SystemContentBlock::Text(request.system_prompt.clone()));
        }
        let mut messages = Vec::new();
        for message in request.conversation() {
            let role = match message.role {
                Role::System => {
                    system.push(SystemContentBlock::Text(message.content));
                    continue;
                }
                Role::User => ConversationRole::User,
                Role::Assistant => ConversationRole::Assistant,
            };
            let built = SdkMessage::builder()
                .role(role)
                .content(ContentBlock::Text(message.content))
                .build()
                .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
            messages.push(built);
        }
        Ok((system, messages))
    }

    fn inference(request: &QueryRequest) -> InferenceConfiguration {
        let max_tokens = i32::try_from(request.max_tokens).unwrap_or(i32::MAX);
        InferenceConfiguration::builder().max_tokens(max_tokens).build()
    }

    /// Turn `toolSpec` declarations into the SDK's tool configuration.
    fn tool_config(declared: &[Value]) -> Result<Option<ToolConfiguration>> {
        if declared.is_empty() {
            return Ok(None);
        }
        let mut tools = Vec::with_capacity(declared.len());
        for declaration in declared {
            let spec = &declaration["toolSpec"];
            let name = spec["name"]
                .as_str()
                .ok_or_else(|| ConnectorError::InvalidRequest("tool declaration without a name".into()))?;
            let built = ToolSpecification::builder()
                .name(name)
                .set_description(spec["description"].as_str().map(str::to_string))
                .input_schema(ToolInputSchema::Json(to_document(&spec["inputSchema"]["json"])))
                .build()
                .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
            tools.push(Tool::ToolSpec(built));
        }
        let config = ToolConfiguration::builder()
            .set_tools(Some(tools))
            .build()
            .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
        Ok(Some(config))
    }

    fn parse_content(blocks: &[ContentBlock]) -> Result<QueryResult> {
        let mut text = String::new();
        let mut calls = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text(chunk) => text.push_str(chunk),
                ContentBlock::ToolUse(tool_use) => {
                    calls.push(ToolInvocation::from_value(
                        tool_use.name(),
                        from_document(tool_use.input()),
                    )?);
                }
                other => trace!(block = ?other, "ignoring content block"),
            }
        }
        Ok(QueryResult::from_calls(text, calls, ProviderKind::Bedrock))
    }

    async fn converse(
        &self,
        request: &QueryRequest,
        declared: &[Value],
        ctx: &CallContext,
    ) -> Result<QueryResult> {
        let client = self.client(ctx).await?;
        let (system, messages) = Self::build_messages(request)?;
        trace!(model = %self.model, messages = messages.len(), "bedrock converse");

        let call = client
            .converse()
            .model_id(&self.model)
            .set_system(Some(system).filter(|s| !s.is_empty()))
            .set_messages(Some(messages))
            .inference_config(Self::inference(request))
            .set_tool_config(Self::tool_config(declared)?)
            .send();
        let output = cancellable(ctx, async { call.await.map_err(sdk_error) }).await?;

        let Some(OutputKind::Message(message)) = output.output() else {
            return Err(ConnectorError::malformed("response has no output message"));
        };
        let result = Self::parse_content(message.content())?;
        usage_of(output.usage()).log(ProviderKind::Bedrock, &self.model);
        debug!(
            stop_reason = ?output.stop_reason(),
            tool = ?result.tool_call.as_ref().map(|c| &c.name),
            "bedrock round complete"
        );
        Ok(result)
    }

    async fn converse_stream(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        let client = self.client(ctx).await?;
        let (system, messages) = Self::build_messages(request)?;

        let call = client
            .converse_stream()
            .model_id(&self.model)
            .set_system(Some(system).filter(|s| !s.is_empty()))
            .set_messages(Some(messages))
            .inference_config(Self::inference(request))
            .send();
        let mut output = cancellable(ctx, async { call.await.map_err(sdk_error) }).await?;

        let mut text = String::new();
        let mut usage = Usage::default();
        loop {
            let event = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ConnectorError::Cancelled),
                event = output.stream.recv() => event,
            };
            match event {
                Ok(Some(StreamEvent::ContentBlockDelta(delta))) => {
                    if let Some(ContentBlockDelta::Text(chunk)) = delta.delta() {
                        ctx.emit(chunk);
                        text.push_str(chunk);
                    }
                }
                Ok(Some(StreamEvent::Metadata(metadata))) => usage.absorb(usage_of(metadata.usage())),
                Ok(Some(StreamEvent::MessageStop(stop))) => {
                    debug!(stop_reason = ?stop.stop_reason(), "bedrock stream stopped");
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return Err(stream_error(e)),
            }
        }
        usage.log(ProviderKind::Bedrock, &self.model);
        Ok(text)
    }
}

#[async_trait]
impl Connector for BedrockConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Bedrock
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
                    "toolSpec": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": { "json": schema.to_json_schema() },
                    }
                }))
            })
            .collect()
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        request.validate()?;
        if request.streaming {
            return self.converse_stream(request, ctx).await;
        }
        Ok(self.converse(request, &[], ctx).await?.text)
    }

    async fn query_with_tool(
        &self,
        request: &QueryRequest,
        ctx: &CallContext,
    ) -> Result<QueryResult> {
        request.validate()?;
        let declared = self.declare_tools(&request.tools)?;
        self.converse(request, &declared, ctx).await
    }
}

/// Race an SDK future against cancellation.
async fn cancellable<T>(ctx: &CallContext, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ConnectorError::Cancelled),
        result = call => result,
    }
}

fn usage_of(usage: Option<&TokenUsage>) -> Usage {
    usage
        .map(|u| {
            Usage::new(
                u64::try_from(u.input_tokens()).unwrap_or(0),
                u64::try_from(u.output_tokens()).unwrap_or(0),
            )
        })
        .unwrap_or_default()
}

/// Map a service error code and HTTP status onto the error taxonomy.
fn classify(status: Option<u16>, code: Option<&str>, message: String) -> ConnectorError {
    const DENIED: &[&str] = &[
        "AccessDeniedException",
        "UnrecognizedClientException",
        "ExpiredTokenException",
        "InvalidSignatureException",
    ];
    warn!(status = ?status, code = ?code, message = %message, "bedrock request rejected");
    match (status, code) {
        (Some(401 | 403), _) => ConnectorError::forbidden(ProviderKind::Bedrock),
        (_, Some(code)) if DENIED.contains(&code) => ConnectorError::forbidden(ProviderKind::Bedrock),
        (Some(429), _) | (_, Some("ThrottlingException")) => ConnectorError::RateLimited,
        // stream events carry no status
        (status, _) => ConnectorError::Api {
            status: status.unwrap_or(500),
            message,
        },
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ConnectorError::Network(detail),
        SdkError::ResponseError(_) => ConnectorError::malformed(detail),
        SdkError::ConstructionFailure(_) => ConnectorError::InvalidRequest(detail),
        _ => {
            let status = err.raw_response().map(|raw| raw.status().as_u16());
            let service = err.as_service_error();
            let message = service.and_then(|e| e.message()).map(str::to_string).unwrap_or(detail);
            classify(status, service.and_then(|e| e.code()), message)
        }
    }
}

fn stream_error<E, R>(err: SdkError<E, R>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ConnectorError::Network(detail),
        SdkError::ResponseError(_) => ConnectorError::malformed(detail),
        _ => {
            let service = err.as_service_error();
            let message = service.and_then(|e| e.message()).map(str::to_string).unwrap_or(detail);
            classify(None, service.and_then(|e| e.code()), message)
        }
    }
}

fn to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => Document::Number(match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => Number::PosInt(u),
            (None, Some(i)) => Number::NegInt(i),
            (None, None) => Number::Float(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), to_document(value)))
                .collect(),
        ),
    }
}

fn from_document(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(Number::PosInt(u)) => json!(u),
        Document::Number(Number::NegInt(i)) => json!(i),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(from_document).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), from_document(value)))
                .collect(),
        ),
    }
}
