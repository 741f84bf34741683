//! Tools that exist only inside the task loop's catalogue

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Tool, ToolContext, ToolError, ToolResult};

pub const USER_CLARIFICATION: &str = "user_clarification";
pub const FINAL_ANSWER: &str = "final_answer";

fn string_arg(args: &Map<String, Value>, key: &str) -> ToolResult<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("failed to extract {} from tool input", key)))
}

/// Asks the operator a question and returns the reply
#[derive(Debug, Default, Clone, Copy)]
pub struct UserClarificationTool;

#[async_trait]
impl Tool for UserClarificationTool {
    fn name(&self) -> &str {
        USER_CLARIFICATION
    }

    fn description(&self) -> &str {
        "Ask the user for clarification or additional information."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Ask a question to the user to get more info required to solve or clarify their problem"
                }
            },
            "required": ["question"]
        })
    }

    async fn run(&self, args: Map<String, Value>, ctx: &ToolContext) -> ToolResult<String> {
        let question = string_arg(&args, "question")?;
        debug!(question = %question, "asking operator");
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            reply = ctx.operator.ask(&question) => reply,
        }
    }
}

/// Ends the task with its `answer` argument
#[derive(Debug, Default, Clone, Copy)]
pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        FINAL_ANSWER
    }

    fn description(&self) -> &str {
        "Provide the final answer to the task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "Call this tool when the task is complete and you want to provide the final answer."
                }
            },
            "required": ["answer"]
        })
    }

    async fn run(&self, args: Map<String, Value>, _ctx: &ToolContext) -> ToolResult<String> {
        string_arg(&args, "answer")
    }
}
