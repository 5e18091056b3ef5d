//! Durable chat history per conversation.
//!
//! The loop appends exactly once per top-level invocation, after it has
//! terminated. Stores never rewrite existing messages.

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::message::{ConversationId, Message};

/// The core HistoryStore trait.
///
/// Implementations: JSON files on disk, in-memory (for testing).
/// Implementations must serialize concurrent appends to the same
/// conversation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "json_file", "in_memory").
    fn name(&self) -> &str;

    /// Load all messages of a conversation in order. Unknown ids are empty.
    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError>;

    /// Append messages to the end of a conversation.
    async fn append(&self, id: &ConversationId, messages: Vec<Message>)
    -> Result<(), HistoryError>;

    /// Delete a conversation. Returns whether it existed.
    async fn delete(&self, id: &ConversationId) -> Result<bool, HistoryError>;
}
