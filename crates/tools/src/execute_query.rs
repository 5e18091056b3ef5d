//! `execute_query`: run SQL against the session database.

use async_trait::async_trait;
use std::sync::Arc;
use talk2sql_core::error::ToolError;
use talk2sql_core::tool::{ExecutionContext, Observation, Tool};
use tracing::debug;

use crate::database::SqlDatabase;

pub struct ExecuteQueryTool {
    db: Arc<SqlDatabase>,
    preview_rows: usize,
}

impl ExecuteQueryTool {
    pub fn new(db: Arc<SqlDatabase>, preview_rows: usize) -> Self {
        Self { db, preview_rows }
    }
}

#[async_trait]
impl Tool for ExecuteQueryTool {
    fn name(&self) -> &str {
        "execute_query"
    }

    fn description(&self) -> &str {
        "Execute a SQL query against the database and return how many rows it produced."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sql_query": {
                    "type": "string",
                    "description": "The SQLite query to execute"
                }
            },
            "required": ["sql_query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Observation, ToolError> {
        let sql = arguments["sql_query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'sql_query' argument".into()))?;

        let result = self
            .db
            .run(sql, self.preview_rows)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        debug!(rows = result.total_rows, "Query executed");
        let output = format!(
            "Successfully executed query, returned {} rows",
            result.total_rows
        );
        let data = serde_json::to_value(&result).unwrap_or_default();
        ctx.record_query(sql, result);

        Ok(Observation::success(output).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::sample_db;

    async fn tool() -> ExecuteQueryTool {
        ExecuteQueryTool::new(Arc::new(sample_db().await), 10)
    }

    #[tokio::test]
    async fn reports_row_count_and_records_context() {
        let tool = tool().await;
        let mut ctx = ExecutionContext::new();

        let obs = tool
            .execute(
                serde_json::json!({"sql_query": "SELECT name FROM users"}),
                &mut ctx,
            )
            .await
            .unwrap();

        assert!(obs.success);
        assert_eq!(obs.output, "Successfully executed query, returned 7 rows");
        assert_eq!(ctx.last_query.as_deref(), Some("SELECT name FROM users"));
        let result = ctx.last_result.unwrap();
        assert_eq!(result.columns, vec!["name"]);
        assert_eq!(result.total_rows, 7);
    }

    #[tokio::test]
    async fn sql_error_is_execution_failure() {
        let tool = tool().await;
        let mut ctx = ExecutionContext::new();

        let err = tool
            .execute(serde_json::json!({"sql_query": "SELEC nonsense"}), &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(ctx.last_query.is_none());
    }

    #[tokio::test]
    async fn missing_argument_rejected() {
        let tool = tool().await;
        let err = tool
            .execute(serde_json::json!({}), &mut ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
