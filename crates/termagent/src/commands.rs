//! Command implementations

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use termagent_agent::mcp::{discover, CapabilityServer};
use termagent_agent::tools::builtin_tools;
use termagent_agent::{Agent, AgentError, AgentOptions, SystemPrompts};
use termagent_config::{chat_path, chat_session_path, history_path, memory_path, Config};
use termagent_provider::{create_connector_with, ConnectorOptions, Message, ProviderKind};

use crate::chat::ChatSessions;
use crate::history::JsonlHistory;
use crate::memory::MemoryStore;

#[derive(Subcommand)]
pub enum ToolsAction {
    /// List available tools
    List,
    /// Show a tool's parameters
    Help { name: String },
    /// Run a tool directly with JSON arguments
    Exec {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Remember a fact; repeats are skipped
    Add {
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    /// List remembered facts
    List,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set the default provider
    SetProvider { provider: String },
    /// Set the model of the default provider
    SetModel { model: String },
    /// Set the capability-server definitions file
    SetMcpFile { path: String },
}

/// An agent plus the capability servers it talks to
struct Session {
    agent: Agent,
    servers: Vec<Arc<CapabilityServer>>,
    streamed: Arc<AtomicBool>,
}

/// Which backend a session talks to, and whether memory joins the prompt
#[derive(Debug, Default)]
pub struct Target {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub memory: bool,
}

impl Session {
    async fn open(config: &Config, target: Target) -> Result<Self> {
        let provider = target.provider.unwrap_or_else(|| config.default_provider.clone());
        let model = target.model.unwrap_or_else(|| config.model_for(&provider));
        let kind: ProviderKind = provider.parse().map_err(AgentError::from)?;

        let mut options = ConnectorOptions::from_env(kind);
        if options.base_url.is_none() {
            options.base_url = config.base_url_for(&provider);
        }
        if options.profile.is_none() {
            options.profile = config.profile_for(&provider);
        }
        let connector = create_connector_with(kind, &model, options).map_err(AgentError::from)?;

        let mut tools = builtin_tools(&config.toolkit);
        let definitions = config
            .capability_servers()
            .await
            .map_err(AgentError::from)?;
        let (servers, remote) = discover(&definitions).await;
        for tool in remote {
            tools.register(tool);
        }
        debug!(provider = %kind, tools = tools.len(), "session ready");

        let mut prompts = SystemPrompts::from_config(&config.agent);
        if target.memory || config.memory {
            let path = memory_path();
            let block = MemoryStore::new(&path)
                .format_as_prompt()
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            prompts = prompts.with_memory(&block);
        }

        let streamed = Arc::new(AtomicBool::new(false));
        let flag = streamed.clone();
        let agent = Agent::new(connector, tools)
            .with_prompts(prompts)
            .with_options(AgentOptions::from_config(&config.agent))
            .with_history(Arc::new(JsonlHistory::new(history_path())))
            .with_stream_sink(Arc::new(move |chunk: &str| {
                flag.store(true, Ordering::Relaxed);
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            }));

        Ok(Self {
            agent,
            servers,
            streamed,
        })
    }

    async fn close(self) {
        for server in self.servers {
            server.shutdown().await;
        }
    }
}

/// Cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

pub async fn ask_command(config: &Config, target: Target, query: String, stream: bool) -> Result<()> {
    let session = Session::open(config, target).await?;
    let result = session.agent.question(&query, stream, interrupt_token()).await;
    let streamed = session.streamed.load(Ordering::Relaxed);
    session.close().await;

    print_answer(result?, streamed);
    Ok(())
}

pub async fn chat_command(
    config: &Config,
    target: Target,
    query: String,
    stream: bool,
    new_session: bool,
) -> Result<()> {
    let chats = ChatSessions::new(chat_path(), chat_session_path());
    let opened = if new_session {
        chats.start_new().await
    } else {
        chats.current_or_start().await
    };
    let id = opened.context("failed to open chat session")?;
    let earlier = chats
        .messages(id)
        .await
        .context("failed to load chat history")?;
    debug!(session = id, turns = earlier.len(), "continuing chat");

    let session = Session::open(config, target).await?;
    let result = session
        .agent
        .chat(&query, earlier, stream, interrupt_token())
        .await;
    let streamed = session.streamed.load(Ordering::Relaxed);
    session.close().await;

    let answer = result?;
    chats
        .append(id, &Message::user(query))
        .await
        .context("failed to save chat turn")?;
    chats
        .append(id, &Message::assistant(answer.clone()))
        .await
        .context("failed to save chat turn")?;
    print_answer(answer, streamed);
    Ok(())
}

fn print_answer(answer: String, streamed: bool) {
    if streamed {
        println!();
    } else {
        println!("{}", answer);
    }
}

pub async fn task_command(config: &Config, target: Target, query: String) -> Result<()> {
    let session = Session::open(config, target).await?;
    let result = session.agent.run_task(&query, interrupt_token()).await;
    session.close().await;

    let report = result?;
    debug!(status = ?report.status, rounds = report.rounds, "task report");
    println!("{}", report.answer);
    Ok(())
}

pub async fn tools_command(config: &Config, action: ToolsAction) -> Result<()> {
    let session = Session::open(config, Target::default()).await?;
    let result = run_tools_action(&session.agent, action).await;
    session.close().await;
    result
}

async fn run_tools_action(agent: &Agent, action: ToolsAction) -> Result<()> {
    match action {
        ToolsAction::List => {
            for (name, tool) in agent.tools().all() {
                println!("{:<20} {}", name, tool.description());
            }
        }
        ToolsAction::Help { name } => {
            println!("{}", agent.tool_help(&name)?);
        }
        ToolsAction::Exec { name, arguments } => {
            let arguments = parse_arguments(&arguments)?;
            let output = agent.run_tool(&name, arguments, interrupt_token()).await?;
            println!("{}", output);
        }
    }
    Ok(())
}

fn parse_arguments(text: &str) -> std::result::Result<Map<String, Value>, AgentError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::InvalidArguments(format!(
            "arguments must be a JSON object, got {}",
            other
        ))),
        Err(e) => Err(AgentError::InvalidArguments(format!(
            "arguments are not valid JSON: {}",
            e
        ))),
    }
}

pub async fn history_command(limit: usize) -> Result<()> {
    let path = history_path();
    let records = JsonlHistory::new(&path)
        .recent(limit)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    if records.is_empty() {
        println!("No history yet");
        return Ok(());
    }
    for record in records {
        println!(
            "{} [{}] {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.method,
            record.query
        );
        for line in record.answer.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

pub async fn memory_command(action: MemoryAction) -> Result<()> {
    let path = memory_path();
    let memory = MemoryStore::new(&path);
    match action {
        MemoryAction::Add { content } => {
            let content = content.join(" ");
            let added = memory
                .add(&content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            debug!(added, content = %content, "memory add");
        }
        MemoryAction::List => {
            let entries = memory
                .list()
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            if entries.is_empty() {
                println!("No memory entries found.");
            }
            for entry in entries {
                println!("{} {}", entry.timestamp.to_rfc3339(), entry.content);
            }
        }
    }
    Ok(())
}

pub async fn config_command(mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", termagent_config::config_path().display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        ConfigAction::SetProvider { provider } => {
            config.set_default_provider(&provider).map_err(AgentError::from)?;
            println!("Default provider set to {}", provider);
        }
        ConfigAction::SetModel { model } => {
            config.set_model(&model);
            println!("Model for {} set to {}", config.default_provider, model);
        }
        ConfigAction::SetMcpFile { path } => {
            config.set_mcp_file_path(&path);
            println!("Capability server file set to {}", path);
        }
    }
    config.save().await.context("failed to save config")?;
    Ok(())
}
