//! # Talk2SQL Core
//!
//! Domain types, traits, and error definitions for the Talk2SQL agent.
//! This crate has **zero framework dependencies**: it defines the domain
//! model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the tool invocation loop is a trait here (the model
//! [`Provider`], the [`Tool`] capability, the [`HistoryStore`]).
//! Implementations live in their respective crates, so the loop can be
//! driven by scripted providers and in-memory stores in tests.

pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod scratchpad;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use history::HistoryStore;
pub use message::{ConversationId, Message, Role};
pub use provider::{ProposalRequest, Provider, StreamChunk, ToolCallDelta};
pub use scratchpad::{Scratchpad, ScratchpadEntry};
pub use tool::{ExecutionContext, Observation, TabularResult, Tool, ToolCall, ToolRegistry};
