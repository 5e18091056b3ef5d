//! Provider trait: the abstraction over the model backend.
//!
//! A Provider turns the loop's current context into exactly one proposed
//! tool call, either as a complete response or as a stream of incremental
//! fragments that the streaming bridge coalesces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::scratchpad::ScratchpadEntry;
use crate::tool::ToolCall;

/// Everything the model sees for one loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRequest {
    /// Opaque context (the database schema), passed through unchanged
    pub schema_context: String,

    /// The natural-language request
    pub user_input: String,

    /// Prior messages of the conversation
    #[serde(default)]
    pub history: Vec<Message>,

    /// Proposals and observations so far in this invocation
    #[serde(default)]
    pub scratchpad: Vec<ScratchpadEntry>,

    /// Tools the model may call
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A fragment of an in-progress tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the model turn
    #[serde(default)]
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Partial name text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Partial argument text
    #[serde(default)]
    pub arguments: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Narration text outside any tool call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool call fragment carried by this chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,

    /// End of the model's turn
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn fragment(delta: ToolCallDelta) -> Self {
        Self {
            tool_call: Some(delta),
            ..Self::default()
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn end_of_turn() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Receiver half of a provider stream.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The loop calls `propose()` or `stream()` without knowing which backend is
/// behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Ask the model for the next tool call.
    async fn propose(
        &self,
        request: &ProposalRequest,
    ) -> std::result::Result<ToolCall, ProviderError>;

    /// Ask the model for the next tool call as a stream of fragments.
    ///
    /// Default implementation calls `propose()` and wraps the result as a
    /// single fragment followed by an end-of-turn chunk.
    async fn stream(
        &self,
        request: &ProposalRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let call = self.propose(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx
            .send(Ok(StreamChunk::fragment(ToolCallDelta {
                index: 0,
                id: Some(call.id),
                name: Some(call.name),
                arguments: call.arguments.to_string(),
            })))
            .await;
        let _ = tx.send(Ok(StreamChunk::end_of_turn())).await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
