//! The tool invocation loop: the heart of Talk2SQL.
//!
//! The loop follows a **Propose → Execute → Observe** cycle:
//!
//! 1. **Ask the model** for exactly one tool call, given the schema, the
//!    question, the chat history and the scratchpad so far
//! 2. **Execute** the tool through the registry
//! 3. **Record** the (proposal, observation) pair in the scratchpad
//! 4. **Stop** when the terminal tool was called, otherwise loop back to 1
//!
//! The loop also stops after `max_iterations`, returning a fixed fallback
//! answer. In streaming mode each model call goes through the [`bridge`],
//! which surfaces partial output while coalescing the proposal.

pub mod bridge;
pub mod loop_runner;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bridge::{BridgeItem, PartialToolCall, TurnEnd};
pub use loop_runner::{AgentExecutor, InvokeOutcome, LoopResult, LoopRun};
pub use stream_event::AgentStreamEvent;
