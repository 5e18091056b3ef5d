//! Tool trait: the abstraction over the loop's capabilities.
//!
//! A tool is what the model can ask the loop to do: run a SQL query, or hand
//! back the final answer. Exactly one registered tool is *terminal*: when the
//! model proposes it, the loop stops and the tool's arguments become the
//! answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::message::ConversationId;
use crate::provider::ToolDefinition;

/// A request to execute a tool. Produced only by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation ID, unique within one loop invocation
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Interpret model-produced argument text.
    ///
    /// Empty text is `{}`; valid JSON is parsed; anything else is kept as a
    /// JSON string of the raw text so the tool can report it.
    pub fn parse_arguments(text: &str) -> serde_json::Value {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return serde_json::Value::Object(serde_json::Map::new());
        }
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
    }

    /// The arguments as wire text (inverse of `parse_arguments`).
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// The result of executing a tool call, as fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Observation {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// Observation for a tool that failed; the model reads it next iteration.
    pub fn failure(error: &ToolError) -> Self {
        Self {
            success: false,
            output: format!("Error: {error}"),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A tabular query result, truncated to a preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Row count before truncation.
    pub total_rows: usize,
}

/// Per-invocation state shared between the loop and its tools.
///
/// One context is created per `invoke` call and never shared between
/// concurrent invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// The last query a tool executed successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_query: Option<String>,

    /// The preview of that query's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<TabularResult>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_conversation(id: ConversationId) -> Self {
        Self {
            conversation_id: Some(id),
            ..Self::default()
        }
    }

    /// Record a successfully executed query.
    pub fn record_query(&mut self, query: impl Into<String>, result: TabularResult) {
        self.last_query = Some(query.into());
        self.last_result = Some(result);
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "execute_query").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ExecutionContext,
    ) -> std::result::Result<Observation, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A fixed set of tools with one distinguished terminal tool.
///
/// Built once, then shared read-only (`Arc<ToolRegistry>`) by every loop
/// invocation that uses it.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    terminal: Option<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            terminal: None,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Register the terminal tool. Replaces the previous terminal marker.
    pub fn register_terminal(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(previous) = self.terminal.replace(name.clone()) {
            if previous != name {
                tracing::warn!(previous = %previous, terminal = %name, "Replacing terminal tool");
            }
        }
        self.register(tool);
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> std::result::Result<&dyn Tool, ToolError> {
        self.tools
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| ToolError::Unknown(name.to_string()))
    }

    /// Whether `name` is the terminal tool.
    pub fn is_terminal(&self, name: &str) -> bool {
        self.terminal.as_deref() == Some(name)
    }

    pub fn terminal_name(&self) -> Option<&str> {
        self.terminal.as_deref()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
