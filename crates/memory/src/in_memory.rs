//! In-memory history store, for tests and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use talk2sql_core::error::HistoryError;
use talk2sql_core::history::HistoryStore;
use talk2sql_core::message::{ConversationId, Message};
use tokio::sync::RwLock;

pub struct InMemoryHistory {
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Number of conversations with at least one message.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        id: &ConversationId,
        messages: Vec<Message>,
    ) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.conversations
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, HistoryError> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }
}
