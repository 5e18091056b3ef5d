//! The per-invocation scratchpad.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::tool::{Observation, ToolCall};

/// One loop iteration: what the model proposed and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub call: ToolCall,
    pub observation: Observation,
}

impl ScratchpadEntry {
    /// The observation text the model reads on the next iteration.
    pub fn observation_text(&self) -> String {
        format!("The {} tool returned {}", self.call.name, self.observation.output)
    }

    /// The proposal message followed by its observation message.
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::proposal(self.call.clone()),
            Message::observation(&self.call.id, self.observation_text()),
        ]
    }
}

/// Append-only log of (proposal, observation) pairs.
///
/// Lives for exactly one `invoke` call and is never persisted.
#[derive(Debug, Clone, Default)]
pub struct Scratchpad {
    entries: Vec<ScratchpadEntry>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: ToolCall, observation: Observation) {
        self.entries.push(ScratchpadEntry { call, observation });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScratchpadEntry] {
        &self.entries
    }

    /// Names of every tool called so far, in order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.call.name.as_str()).collect()
    }

    /// Render as alternating proposal / observation messages.
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries.iter().flat_map(|e| e.to_messages()).collect()
    }
}
