//! Agent: single questions and the tool-using task loop

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use termagent_config::AgentDefaults;
use termagent_provider::{
    CallContext, Connector, ConnectorError, Message, QueryRequest, StreamCallback, ToolInvocation,
};

use crate::context::SystemPrompts;
use crate::history::{HistoryRecord, HistorySink};
use crate::operator::{Operator, TerminalOperator};
use crate::task::{TaskState, TaskStatus};
use crate::tools::synthetic::FINAL_ANSWER;
use crate::tools::{FinalAnswerTool, ToolContext, ToolError, ToolRegistry, UserClarificationTool};
use crate::{AgentError, Result};

/// Loop limits and token budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub max_tokens: u32,
    pub max_iterations: u32,
    pub task_timeout: Duration,
    /// Characters of each result shown to the model per round
    pub result_truncation: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            max_iterations: 10,
            task_timeout: Duration::from_secs(900),
            result_truncation: 2000,
        }
    }
}

impl AgentOptions {
    pub fn from_config(agent: &AgentDefaults) -> Self {
        Self {
            max_tokens: agent.max_tokens,
            max_iterations: agent.max_iterations,
            task_timeout: Duration::from_secs(agent.task_timeout_secs),
            result_truncation: agent.result_truncation,
        }
    }
}

/// How a task ended
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub answer: String,
    pub status: TaskStatus,
    /// Tool-enabled model rounds; the summary call is not counted
    pub rounds: u32,
    pub state: TaskState,
}

/// Ties a connector to a tool catalogue
pub struct Agent {
    connector: Arc<dyn Connector>,
    tools: Arc<ToolRegistry>,
    task_tools: Arc<ToolRegistry>,
    prompts: SystemPrompts,
    operator: Arc<dyn Operator>,
    history: Option<Arc<dyn HistorySink>>,
    on_chunk: Option<StreamCallback>,
    options: AgentOptions,
}

impl Agent {
    /// `tools` is the user-facing catalogue. Task rounds additionally see
    /// `user_clarification` and `final_answer`.
    pub fn new(connector: Arc<dyn Connector>, tools: ToolRegistry) -> Self {
        let mut task_tools = tools.clone();
        task_tools.register(UserClarificationTool);
        task_tools.register(FinalAnswerTool);

        Self {
            connector,
            tools: Arc::new(tools),
            task_tools: Arc::new(task_tools),
            prompts: SystemPrompts::default(),
            operator: Arc::new(TerminalOperator),
            history: None,
            on_chunk: None,
            options: AgentOptions::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: SystemPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_history(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history = Some(sink);
        self
    }

    /// Where streamed chunks of `question` and `chat` go
    pub fn with_stream_sink(mut self, sink: StreamCallback) -> Self {
        self.on_chunk = Some(sink);
        self
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// One round without tools. Cancelling `cancel` aborts the call.
    pub async fn question(
        &self,
        text: &str,
        streaming: bool,
        cancel: CancellationToken,
    ) -> Result<String> {
        let answer = self.reply(text, Vec::new(), streaming, cancel).await?;
        self.record("ask", text, &answer).await;
        Ok(answer)
    }

    /// One round without tools that continues `history`, oldest turn first.
    pub async fn chat(
        &self,
        text: &str,
        history: Vec<Message>,
        streaming: bool,
        cancel: CancellationToken,
    ) -> Result<String> {
        let answer = self.reply(text, history, streaming, cancel).await?;
        self.record("chat", text, &answer).await;
        Ok(answer)
    }

    async fn reply(
        &self,
        text: &str,
        history: Vec<Message>,
        streaming: bool,
        cancel: CancellationToken,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyQuery);
        }
        let turns = history.len();
        let request = QueryRequest::new(self.prompts.ask.clone(), text)
            .with_history(history)
            .with_streaming(streaming)
            .with_max_tokens(self.options.max_tokens);

        let mut ctx = CallContext::new().with_cancel(cancel);
        if streaming {
            if let Some(sink) = &self.on_chunk {
                ctx = ctx.with_sink(sink.clone());
            }
        }

        debug!(provider = %self.connector.provider(), streaming, turns, "asking question");
        let answer = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            answer = self.connector.query(&request, &ctx) => answer,
        };
        match answer {
            Err(ConnectorError::Cancelled) => Err(AgentError::Cancelled),
            other => Ok(other?),
        }
    }

    /// Run the task loop to completion and return the answer.
    pub async fn task(&self, text: &str) -> Result<String> {
        self.run_task(text, CancellationToken::new())
            .await
            .map(|report| report.answer)
    }

    /// Run the task loop under the configured timeout. Cancelling `cancel`
    /// stops the in-flight call or tool and fails the task with `Cancelled`.
    pub async fn run_task(&self, text: &str, cancel: CancellationToken) -> Result<TaskReport> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        let timeout = self.options.task_timeout;
        let token = cancel.child_token();
        let mut state = TaskState::new(text, self.options.max_iterations);
        info!(
            provider = %self.connector.provider(),
            model = %self.connector.model(),
            max_iterations = self.options.max_iterations,
            "starting task"
        );

        let outcome = tokio::select! {
            result = self.drive(&mut state, &token) => result,
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                Err(AgentError::Timeout(timeout.as_secs()))
            }
        };

        let answer = match outcome {
            Ok(answer) => answer,
            Err(e) => {
                state.status = TaskStatus::Failed;
                warn!(iteration = state.iteration, error = %e, "task failed");
                return Err(e);
            }
        };

        info!(status = ?state.status, rounds = state.iteration, "task finished");
        self.record("task", text, &answer).await;
        Ok(TaskReport {
            answer,
            status: state.status,
            rounds: state.iteration,
            state,
        })
    }

    async fn drive(&self, state: &mut TaskState, cancel: &CancellationToken) -> Result<String> {
        let catalogue = self.task_tools.specs();
        let call_ctx = CallContext::new().with_cancel(cancel.clone());
        let tool_ctx = ToolContext::new(self.operator.clone()).with_cancel(cancel.clone());

        while state.has_budget() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            state.iteration += 1;
            info!(
                iteration = state.iteration,
                max_iterations = state.max_iterations,
                progress = state.completion_percent,
                "task round"
            );

            let request = QueryRequest::new(
                self.prompts.task.clone(),
                state.render_prompt(self.options.result_truncation),
            )
            .with_max_tokens(self.options.max_tokens)
            .with_tools(catalogue.clone());

            let result = self.connector.query_with_tool(&request, &call_ctx).await?;
            state.advance_round();

            match result.tool_call {
                Some(call) => {
                    if let Some(answer) = self.apply_tool(state, call, result.text, &tool_ctx).await? {
                        return Ok(answer);
                    }
                }
                None => state.current_thought = result.text,
            }
        }

        state.status = TaskStatus::Exhausted;
        info!(rounds = state.iteration, "iteration budget spent, summarizing");
        let request = QueryRequest::new(self.prompts.task.clone(), state.render_summary())
            .with_max_tokens(self.options.max_tokens.saturating_mul(2));
        Ok(self.connector.query(&request, &call_ctx).await?)
    }

    /// Execute the requested tool and fold its outcome into `state`.
    /// Returns the answer once `final_answer` succeeds.
    async fn apply_tool(
        &self,
        state: &mut TaskState,
        call: ToolInvocation,
        text: String,
        ctx: &ToolContext,
    ) -> Result<Option<String>> {
        let ToolInvocation { name, arguments } = call;
        let provided = Value::Object(arguments.clone()).to_string();
        debug!(tool = %name, arguments = %provided, "model requested tool");

        match self.task_tools.execute(&name, arguments, ctx).await {
            Ok(output) => {
                state.record(name.clone(), output.clone());
                state.record(format!("{} justification", name), text.clone());
                state.advance_tool();
                state.current_thought = text;
                if name == FINAL_ANSWER {
                    state.status = TaskStatus::Completed;
                    return Ok(Some(output));
                }
                Ok(None)
            }
            Err(ToolError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool failed");
                state.record("tool_error", format!("Failed to execute {}: {}", name, e));
                state.record("tool_input", format!("Provided tool arguments: {}", provided));
                if !text.trim().is_empty() {
                    state.current_thought = text;
                }
                Ok(None)
            }
        }
    }

    /// Help text of a tool in the user-facing catalogue
    pub fn tool_help(&self, name: &str) -> Result<String> {
        self.tools
            .get(name)
            .map(|tool| tool.help_text())
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    /// Run one tool directly, outside the task loop.
    pub async fn run_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let ctx = ToolContext::new(self.operator.clone()).with_cancel(cancel);
        Ok(self.tools.execute(name, arguments, &ctx).await?)
    }

    async fn record(&self, method: &str, query: &str, answer: &str) {
        let Some(sink) = &self.history else {
            return;
        };
        if let Err(e) = sink.record(&HistoryRecord::new(method, query, answer)).await {
            warn!(error = %e, "failed to write history");
        }
    }
}
