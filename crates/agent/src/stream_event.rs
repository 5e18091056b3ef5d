//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level stream chunks and loop progress
//! into higher-level events that the gateway forwards to clients over SSE.

use serde::{Deserialize, Serialize};

/// Events emitted by the loop during streaming execution.
///
/// - `chunk`       : partial model output (narration or tool-call text)
/// - `tool_call`   : the loop is invoking a tool
/// - `tool_result` : tool execution completed
/// - `done`        : the loop terminated, with the final payload
/// - `error`       : the invocation failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial output from the model.
    Chunk { content: String },

    /// The loop is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The loop terminated and the outcome is final.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        iterations: u32,
        answered: bool,
        payload: serde_json::Value,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
