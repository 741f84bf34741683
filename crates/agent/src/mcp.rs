//! Capability servers
//!
//! Each configured server is spawned as a child process and spoken to in
//! newline-delimited JSON-RPC 2.0 over its stdio. After the `initialize`
//! handshake its `tools/list` entries become [`RemoteTool`]s that forward
//! `tools/call` to the same process.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use termagent_config::{CapabilityServers, ServerDefinition};
use termagent_provider::ObjectSchema;

use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Live stdio link to one server process
struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
    alive: bool,
}

impl Connection {
    fn spawn(definition: &ServerDefinition) -> ToolResult<Self> {
        let mut cmd = Command::new(&definition.command);
        cmd.args(&definition.args)
            .envs(&definition.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Execution("server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Execution("server stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            alive: true,
        })
    }

    async fn write_message(&mut self, message: &Value) -> ToolResult<()> {
        let line = format!("{}\n", message);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response carrying the same id.
    /// Notifications and stray output in between are skipped.
    async fn request(&mut self, method: &str, params: Value) -> ToolResult<Value> {
        if !self.alive {
            return Err(ToolError::Execution("capability server is not running".to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line).await? == 0 {
                self.alive = false;
                return Err(ToolError::Execution("capability server closed its output".to_string()));
            }
            let Ok(message) = serde_json::from_str::<Value>(line.trim()) else {
                trace!(line = %line.trim(), "skipping non-JSON server output");
                continue;
            };
            if message.get("id").and_then(Value::as_i64) != Some(id) {
                trace!(method = ?message.get("method"), "skipping unrelated server message");
                continue;
            }
            if let Some(error) = message.get("error") {
                let text = error["message"].as_str().unwrap_or("unknown error");
                return Err(ToolError::Execution(format!("server error: {}", text)));
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str) -> ToolResult<()> {
        self.write_message(&json!({ "jsonrpc": "2.0", "method": method, "params": {} }))
            .await
    }

    async fn kill(&mut self) {
        self.alive = false;
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "capability server already gone");
        }
    }
}

/// Description of a tool advertised by a server
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn parse_tool_list(result: &Value) -> Vec<RemoteToolInfo> {
    result["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool["name"].as_str()?.to_string();
                    Some(RemoteToolInfo {
                        name,
                        description: tool["description"].as_str().unwrap_or_default().to_string(),
                        input_schema: tool
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| json!({ "type": "object" })),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Text blocks contribute their text, any other block its JSON.
pub fn flatten_content(result: &Value) -> String {
    let Some(blocks) = result["content"].as_array() else {
        return String::new();
    };
    let mut out = String::new();
    for block in blocks {
        match (block["type"].as_str(), block["text"].as_str()) {
            (Some("text"), Some(text)) => out.push_str(text),
            _ => out.push_str(&block.to_string()),
        }
    }
    out
}

/// One running server shared by all of its tools
pub struct CapabilityServer {
    name: String,
    conn: Mutex<Connection>,
}

impl CapabilityServer {
    /// Spawn the process, run the handshake and list its tools.
    pub async fn connect(
        name: &str,
        definition: &ServerDefinition,
    ) -> ToolResult<(Arc<Self>, Vec<RemoteToolInfo>)> {
        info!(server = %name, command = %definition.command, "starting capability server");
        let mut conn = Connection::spawn(definition)?;

        let handshake = async {
            let init = conn
                .request(
                    "initialize",
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": { "name": "termagent", "version": env!("CARGO_PKG_VERSION") }
                    }),
                )
                .await?;
            debug!(server = %name, info = %init["serverInfo"], "capability server initialized");
            conn.notify("notifications/initialized").await?;
            conn.request("tools/list", json!({})).await
        };
        let listed = match tokio::time::timeout(REQUEST_TIMEOUT, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(REQUEST_TIMEOUT.as_secs())),
        };
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                conn.kill().await;
                return Err(e);
            }
        };

        let tools = parse_tool_list(&listed);
        info!(server = %name, tools = tools.len(), "capability server connected");
        let server = Arc::new(Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
        });
        Ok((server, tools))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke `tool`. Cancellation kills the process and the server stays dead.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ToolResult<String> {
        let mut conn = self.conn.lock().await;
        let params = json!({ "name": tool, "arguments": arguments });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(REQUEST_TIMEOUT, conn.request("tools/call", params)) => Some(result),
        };
        let result = match outcome {
            None => {
                warn!(server = %self.name, tool, "tool call cancelled, stopping server");
                conn.kill().await;
                return Err(ToolError::Cancelled);
            }
            Some(Err(_)) => return Err(ToolError::Timeout(REQUEST_TIMEOUT.as_secs())),
            Some(Ok(result)) => result?,
        };

        let text = flatten_content(&result);
        if result["isError"].as_bool().unwrap_or(false) {
            return Err(ToolError::Execution(text));
        }
        Ok(text)
    }

    pub async fn shutdown(&self) {
        self.conn.lock().await.kill().await;
    }
}

/// A tool living in a capability server
pub struct RemoteTool {
    server: Arc<CapabilityServer>,
    info: RemoteToolInfo,
}

impl RemoteTool {
    pub fn new(server: Arc<CapabilityServer>, info: RemoteToolInfo) -> Self {
        Self { server, info }
    }

    pub fn server(&self) -> &str {
        self.server.name()
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn input_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn run(&self, args: Map<String, Value>, ctx: &ToolContext) -> ToolResult<String> {
        debug!(server = %self.server.name(), tool = %self.info.name, "calling remote tool");
        self.server.call_tool(&self.info.name, args, &ctx.cancel).await
    }
}

/// Connect every configured server and collect their tools. Servers that
/// fail to start, and tools whose schema no backend could declare, are
/// logged and skipped.
pub async fn discover(servers: &CapabilityServers) -> (Vec<Arc<CapabilityServer>>, Vec<RemoteTool>) {
    let mut connected = Vec::new();
    let mut tools = Vec::new();
    for (name, definition) in servers.iter() {
        let (server, infos) = match CapabilityServer::connect(name, definition).await {
            Ok(found) => found,
            Err(e) => {
                warn!(server = %name, error = %e, "capability server unavailable, skipping");
                continue;
            }
        };
        for info in infos {
            if let Err(e) = ObjectSchema::parse(&info.name, &info.input_schema) {
                warn!(server = %name, tool = %info.name, error = %e, "skipping tool with unsupported schema");
                continue;
            }
            tools.push(RemoteTool::new(server.clone(), info));
        }
        connected.push(server);
    }
    (connected, tools)
}
