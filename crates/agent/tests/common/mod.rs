//! Scripted connector shared by the agent integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use termagent_provider::{
    CallContext, Connector, ConnectorError, ProviderKind, QueryRequest, QueryResult, Result,
    ToolSpec,
};

/// Replays a fixed list of tool-round results and records every request.
/// Once the script runs out, rounds answer with plain text.
pub struct ScriptedConnector {
    rounds: Mutex<VecDeque<Result<QueryResult>>>,
    answer: String,
    pub tool_requests: Mutex<Vec<QueryRequest>>,
    pub plain_requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedConnector {
    pub fn new(rounds: Vec<Result<QueryResult>>, answer: &str) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            answer: answer.to_string(),
            tool_requests: Mutex::new(Vec::new()),
            plain_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn tool_rounds(&self) -> usize {
        self.tool_requests.lock().unwrap().len()
    }

    pub fn plain_rounds(&self) -> usize {
        self.plain_requests.lock().unwrap().len()
    }

    pub fn tool_prompt(&self, index: usize) -> String {
        self.tool_requests.lock().unwrap()[index].user_prompt.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> String {
        "scripted".to_string()
    }

    fn declare_tools(&self, tools: &BTreeMap<String, ToolSpec>) -> Result<Vec<Value>> {
        Ok(tools.values().map(|t| json!({ "name": t.name })).collect())
    }

    async fn query(&self, request: &QueryRequest, ctx: &CallContext) -> Result<String> {
        if ctx.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        self.plain_requests.lock().unwrap().push(request.clone());
        if request.streaming {
            for word in self.answer.split_inclusive(' ') {
                ctx.emit(word);
            }
        }
        Ok(self.answer.clone())
    }

    async fn query_with_tool(&self, request: &QueryRequest, ctx: &CallContext) -> Result<QueryResult> {
        if ctx.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        self.tool_requests.lock().unwrap().push(request.clone());
        self.rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::text("still thinking")))
    }
}

pub fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn tool_round(text: &str, name: &str, arguments: Value) -> Result<QueryResult> {
    Ok(QueryResult::tool(text, name, args(arguments)))
}

pub fn text_round(text: &str) -> Result<QueryResult> {
    Ok(QueryResult::text(text))
}
