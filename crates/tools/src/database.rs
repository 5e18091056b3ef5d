//! SQLite session over an uploaded database file.
//!
//! One `SqlDatabase` is opened per request and shared (via `Arc`) by the
//! tools of that request's registry.

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, SqlitePool, Statement, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use talk2sql_core::tool::TabularResult;
use tracing::{debug, info};

/// Number of sample rows shown per table in the schema context.
const SAMPLE_ROWS: usize = 3;

/// Database session errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),
}

pub struct SqlDatabase {
    pool: SqlitePool,
}

impl SqlDatabase {
    /// Open an existing SQLite file. Never creates one.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if !path.is_file() {
            return Err(DatabaseError::NotFound(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .journal_mode(SqliteJournalMode::Delete);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Open(e.to_string()))?;

        // Fails here on files that are not SQLite databases
        sqlx::query("SELECT count(*) FROM sqlite_master")
            .fetch_one(&pool)
            .await
            .map_err(|e| DatabaseError::Open(e.to_string()))?;

        info!(path = %path.display(), "Opened SQLite database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (useful for testing).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Names of all user tables, sorted.
    pub async fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }

    /// Schema description handed to the model: each table's `CREATE`
    /// statement followed by a few sample rows.
    pub async fn table_info(&self) -> Result<String, DatabaseError> {
        let tables = sqlx::query(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut sections = Vec::with_capacity(tables.len());
        for table in &tables {
            let name: String = table
                .try_get("name")
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let create: Option<String> = table
                .try_get("sql")
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let sample = self
                .run(
                    &format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_ident(&name)),
                    SAMPLE_ROWS,
                )
                .await?;

            let mut section = create.unwrap_or_default().trim().to_string();
            section.push_str(&format!(
                "\n\n/*\n{} rows from {name} table:\n{}",
                sample.rows.len(),
                sample.columns.join("\t")
            ));
            for row in &sample.rows {
                let cells: Vec<String> = row.iter().map(display_cell).collect();
                section.push('\n');
                section.push_str(&cells.join("\t"));
            }
            section.push_str("\n*/");
            sections.push(section);
        }

        debug!(tables = tables.len(), "Built schema context");
        Ok(sections.join("\n\n\n"))
    }

    /// Run a query and keep the first `preview_rows` rows.
    pub async fn run(&self, sql: &str, preview_rows: usize) -> Result<TabularResult, DatabaseError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            // No rows to read names from; ask the statement instead
            None => match self.pool.prepare(sql).await {
                Ok(stmt) => stmt.columns().iter().map(|c| c.name().to_string()).collect(),
                Err(_) => Vec::new(),
            },
        };

        let total_rows = rows.len();
        let mut preview = Vec::with_capacity(total_rows.min(preview_rows));
        for row in rows.iter().take(preview_rows) {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..row.columns().len() {
                cells.push(cell_to_json(row, idx).map_err(|e| DatabaseError::Query(e.to_string()))?);
            }
            preview.push(cells);
        }

        Ok(TabularResult {
            columns,
            rows: preview,
            total_rows,
        })
    }
}

/// Convert one cell using its runtime storage class.
fn cell_to_json(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(idx)?),
        "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(idx)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

fn display_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".into(),
        other => other.to_string(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
