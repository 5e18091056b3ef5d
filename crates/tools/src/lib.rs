//! SQL tools for Talk2SQL.
//!
//! The model gets exactly two tools: `execute_query`, which runs SQL
//! against the conversation's uploaded database, and `final_answer`, the
//! terminal tool that ends the loop.

pub mod database;
pub mod execute_query;
pub mod final_answer;

use std::path::Path;
use std::sync::Arc;
use talk2sql_core::tool::ToolRegistry;

pub use database::{DatabaseError, SqlDatabase};
pub use execute_query::ExecuteQueryTool;
pub use final_answer::{FinalAnswer, FinalAnswerTool};

/// The tools known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    ExecuteQuery,
    FinalAnswer,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 2] = [BuiltinTool::ExecuteQuery, BuiltinTool::FinalAnswer];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::ExecuteQuery => "execute_query",
            BuiltinTool::FinalAnswer => "final_answer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuiltinTool::FinalAnswer)
    }
}

/// Build the registry for one request's database session.
pub fn session_registry(db: Arc<SqlDatabase>, preview_rows: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in BuiltinTool::ALL {
        match tool {
            BuiltinTool::ExecuteQuery => {
                registry.register(Box::new(ExecuteQueryTool::new(db.clone(), preview_rows)))
            }
            BuiltinTool::FinalAnswer => registry.register_terminal(Box::new(FinalAnswerTool)),
        }
    }
    registry
}

/// Everything one invocation needs from a conversation's database.
pub struct Session {
    pub registry: ToolRegistry,
    pub schema_context: String,
}

impl Session {
    /// Open the database at `path` and describe its schema.
    pub async fn open(path: &Path, preview_rows: usize) -> Result<Self, DatabaseError> {
        let db = SqlDatabase::open(path).await?;
        let schema_context = db.table_info().await?;
        Ok(Self {
            registry: session_registry(Arc::new(db), preview_rows),
            schema_context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        for tool in BuiltinTool::ALL {
            assert_eq!(BuiltinTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(BuiltinTool::from_name("delete_everything"), None);
    }

    #[tokio::test]
    async fn session_registry_has_terminal_final_answer() {
        let db = Arc::new(database::tests::sample_db().await);
        let registry = session_registry(db, 10);

        assert_eq!(registry.terminal_name(), Some("final_answer"));
        assert!(registry.resolve("execute_query").is_ok());
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["execute_query", "final_answer"]);
        for tool in BuiltinTool::ALL {
            assert_eq!(registry.is_terminal(tool.name()), tool.is_terminal());
        }
    }

    #[tokio::test]
    async fn session_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Session::open(&dir.path().join("nope.db"), 10).await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }
}
