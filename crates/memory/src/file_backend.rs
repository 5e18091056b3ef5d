//! File-based history store: one JSON array per conversation.
//!
//! Storage location: `<data_dir>/memory/<conversation_id>.json`
//!
//! Each file holds the full ordered message list of one conversation.
//! Appends rewrite the file through a temporary sibling and a rename, so a
//! crash mid-write leaves the previous contents in place.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use talk2sql_core::error::HistoryError;
use talk2sql_core::history::HistoryStore;
use talk2sql_core::message::{ConversationId, Message};
use tracing::{debug, warn};

/// A directory of per-conversation JSON files.
///
/// Appends to the same conversation are serialized by a per-id lock;
/// different conversations never contend.
pub struct JsonFileHistory {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JsonFileHistory {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "JSON file history store opened");
        Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_for(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        // A poisoned map only means another thread panicked while inserting;
        // the map itself is still usable.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Read a conversation file. Missing or corrupted files read as empty.
    async fn read_file(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        match serde_json::from_str::<Vec<Message>>(&content) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                warn!(
                    conversation_id = %id,
                    error = %e,
                    "Corrupted history file, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn write_file(
        &self,
        id: &ConversationId,
        messages: &[Message],
    ) -> Result<(), HistoryError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            HistoryError::Storage(format!("Failed to create history directory: {e}"))
        })?;

        let content = serde_json::to_string_pretty(messages)
            .map_err(|e| HistoryError::Storage(format!("Failed to serialize history: {e}")))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to write history file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to replace history file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistory {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        self.read_file(id).await
    }

    async fn append(
        &self,
        id: &ConversationId,
        messages: Vec<Message>,
    ) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut all = self.read_file(id).await?;
        let added = messages.len();
        all.extend(messages);
        self.write_file(id, &all).await?;

        debug!(conversation_id = %id, added, total = all.len(), "History appended");
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, HistoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let removed = match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(HistoryError::Storage(format!(
                    "Failed to delete history file: {e}"
                )));
            }
        };

        // Drop the per-id lock so the map tracks live conversations only
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id.as_str());

        Ok(removed)
    }
}
