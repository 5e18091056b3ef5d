//! Shared test helpers for loop and bridge tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use talk2sql_core::error::{ProviderError, ToolError};
use talk2sql_core::provider::{ChunkReceiver, ProposalRequest, Provider, StreamChunk, ToolCallDelta};
use talk2sql_core::tool::{ExecutionContext, Observation, TabularResult, Tool, ToolCall, ToolRegistry};

/// A provider that returns a sequence of scripted tool calls.
///
/// Also records every request so tests can inspect what the model saw.
/// Streaming goes through the trait's default single-fragment wrapper.
pub struct ScriptedProvider {
    calls: Mutex<VecDeque<ToolCall>>,
    requests: Mutex<Vec<ProposalRequest>>,
}

impl ScriptedProvider {
    pub fn new(calls: Vec<ToolCall>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProposalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(&self, request: &ProposalRequest) -> Result<ToolCall, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.calls
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NoToolCall("script exhausted".into()))
    }
}

/// A provider whose `stream` replays scripted chunks, one turn per call.
pub struct ChunkScriptProvider {
    turns: Mutex<VecDeque<Vec<Result<StreamChunk, ProviderError>>>>,
    keep_open: bool,
}

impl ChunkScriptProvider {
    pub fn new(turns: Vec<Vec<Result<StreamChunk, ProviderError>>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            keep_open: false,
        }
    }

    /// Never close the chunk stream after the script is sent.
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

#[async_trait]
impl Provider for ChunkScriptProvider {
    fn name(&self) -> &str {
        "chunk_script"
    }

    async fn propose(&self, _request: &ProposalRequest) -> Result<ToolCall, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream(&self, _request: &ProposalRequest) -> Result<ChunkReceiver, ProviderError> {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NoToolCall("script exhausted".into()))?;
        let keep_open = self.keep_open;

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in turn {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            if keep_open {
                std::future::pending::<()>().await;
            }
        });
        Ok(rx)
    }
}

/// A provider whose stream never yields anything.
pub struct StalledProvider;

#[async_trait]
impl Provider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn propose(&self, _request: &ProposalRequest) -> Result<ToolCall, ProviderError> {
        std::future::pending().await
    }

    async fn stream(&self, _request: &ProposalRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        Ok(rx)
    }
}

pub fn delta(index: u32, name: Option<&str>, arguments: &str) -> ToolCallDelta {
    ToolCallDelta {
        index,
        id: None,
        name: name.map(String::from),
        arguments: arguments.to_string(),
    }
}

pub fn fragment(index: u32, name: Option<&str>, arguments: &str) -> StreamChunk {
    StreamChunk::fragment(delta(index, name, arguments))
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// Stand-in for `execute_query`: SQL containing "syntax error" fails,
/// anything else "returns" the number of rows given by `LIMIT n` (or 7).
pub struct StubQueryTool;

#[async_trait]
impl Tool for StubQueryTool {
    fn name(&self) -> &str {
        "execute_query"
    }

    fn description(&self) -> &str {
        "Execute a SQL query"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "sql_query": { "type": "string" } },
            "required": ["sql_query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Observation, ToolError> {
        let sql = arguments["sql_query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'sql_query' argument".into()))?;
        if sql.contains("syntax error") {
            return Err(ToolError::ExecutionFailed {
                tool_name: "execute_query".into(),
                reason: "near \"SELEC\": syntax error".into(),
            });
        }
        let rows = sql
            .rsplit("LIMIT ")
            .next()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(7);
        ctx.record_query(
            sql,
            TabularResult {
                columns: vec!["id".into()],
                rows: (0..rows).map(|i| vec![serde_json::json!(i)]).collect(),
                total_rows: rows,
            },
        );
        Ok(Observation::success(format!(
            "Successfully executed query, returned {rows} rows"
        )))
    }
}

/// Terminal stand-in for `final_answer`.
pub struct StubFinalAnswer;

#[async_trait]
impl Tool for StubFinalAnswer {
    fn name(&self) -> &str {
        "final_answer"
    }

    fn description(&self) -> &str {
        "Provide the final answer"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<Observation, ToolError> {
        Ok(Observation::success(
            arguments["answer"].as_str().unwrap_or_default().to_string(),
        ))
    }
}

pub fn stub_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(StubQueryTool));
    registry.register_terminal(Box::new(StubFinalAnswer));
    registry
}
