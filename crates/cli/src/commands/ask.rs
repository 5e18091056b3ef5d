//! `talk2sql ask`: one question against a conversation's database.

use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use talk2sql_agent::AgentStreamEvent;
use talk2sql_config::AppConfig;
use talk2sql_core::message::ConversationId;
use talk2sql_memory::JsonFileHistory;
use talk2sql_tools::{DatabaseError, Session};
use tracing::debug;

pub async fn run(
    conversation: &str,
    db: Option<&Path>,
    stream: bool,
    prompt: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let id = ConversationId::parse(conversation)?;

    let provider = talk2sql_providers::build_from_config(&config).map_err(|e| {
        format!(
            "{e}\n  Set GOOGLE_API_KEY (or api_key in {})",
            AppConfig::config_dir().join("config.toml").display()
        )
    })?;

    let db_dir = config.storage.db_dir();
    let db_path = db_dir.join(format!("{id}.db"));
    if let Some(source) = db {
        std::fs::create_dir_all(&db_dir)?;
        std::fs::copy(source, &db_path)?;
    }

    let session = Session::open(&db_path, config.agent.preview_rows)
        .await
        .map_err(|e| match e {
            DatabaseError::NotFound(_) => {
                format!("No database for conversation '{id}'. Pass --db <file> to attach one.")
            }
            other => other.to_string(),
        })?;
    debug!(
        conversation_id = %id,
        schema_bytes = session.schema_context.len(),
        "Session opened"
    );

    let history = Arc::new(JsonFileHistory::new(config.storage.memory_dir()));
    let executor = talk2sql_gateway::executor_from_config(&config, provider, history);

    let outcome = if stream {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });
        let result = executor
            .invoke_streaming(
                &session.registry,
                &id,
                &session.schema_context,
                prompt,
                Some(tx),
            )
            .await;
        let _ = printer.await;
        result?
    } else {
        executor
            .invoke(&session.registry, &id, &session.schema_context, prompt)
            .await?
    };

    println!("{}", outcome.result.answer());
    if let Some(query) = &outcome.context.last_query {
        println!("\n  SQL: {query}");
    }
    if let Some(table) = &outcome.context.last_result {
        println!();
        print!("{}", render_table(&table.columns, &table.rows, table.total_rows));
    }

    Ok(())
}

fn print_event(event: &AgentStreamEvent) {
    match event {
        AgentStreamEvent::Chunk { content } => {
            eprint!("{content}");
            let _ = std::io::stderr().flush();
        }
        AgentStreamEvent::ToolCall { name, .. } => eprintln!("\n  [{name}]"),
        AgentStreamEvent::ToolResult {
            output, success, ..
        } => {
            let mark = if *success { "ok" } else { "failed" };
            eprintln!("  -> {mark}: {output}");
        }
        AgentStreamEvent::Done { iterations, .. } => eprintln!("  ({iterations} iterations)\n"),
        AgentStreamEvent::Error { message } => eprintln!("  [Error] {message}"),
    }
}

/// Tab-separated preview with a footer when rows were cut.
fn render_table(columns: &[String], rows: &[Vec<Value>], total_rows: usize) -> String {
    let mut out = columns.join("\t");
    out.push('\n');
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => "NULL".into(),
                other => other.to_string(),
            })
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    if total_rows > rows.len() {
        out.push_str(&format!("({} of {total_rows} rows)\n", rows.len()));
    }
    out
}
