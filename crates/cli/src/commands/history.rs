//! `talk2sql history`: inspect or delete a conversation.

use talk2sql_config::AppConfig;
use talk2sql_core::history::HistoryStore;
use talk2sql_core::message::{ConversationId, Role};
use talk2sql_memory::JsonFileHistory;

pub async fn show(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let id = ConversationId::parse(id)?;
    let history = JsonFileHistory::new(config.storage.memory_dir());

    let messages = history.load(&id).await?;
    if messages.is_empty() {
        println!("No messages for conversation '{id}'.");
        return Ok(());
    }

    println!("Conversation {id} ({} messages)\n", messages.len());
    for message in &messages {
        let who = match message.role {
            Role::Human => "You",
            Role::Assistant => "Assistant",
            Role::ToolObservation => "Tool",
        };
        println!(
            "  [{}] {who} > {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.content
        );
        if let Some(query) = message.metadata.get("query").and_then(|q| q.as_str()) {
            println!("      SQL: {query}");
        }
    }

    Ok(())
}

pub async fn delete(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let id = ConversationId::parse(id)?;
    let history = JsonFileHistory::new(config.storage.memory_dir());

    let had_history = history.delete(&id).await?;
    let db_path = config.storage.db_dir().join(format!("{id}.db"));
    let had_database = match std::fs::remove_file(&db_path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    match (had_history, had_database) {
        (false, false) => println!("Conversation '{id}' not found."),
        _ => println!(
            "Deleted conversation '{id}' (history: {had_history}, database: {had_database})."
        ),
    }

    Ok(())
}
