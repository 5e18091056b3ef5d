//! Query, upload and conversation endpoints.
//!
//! Every request that touches a conversation's database opens its own
//! [`Session`]; nothing about a database outlives the request.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        Json,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use talk2sql_core::error::{Error, ProviderError};
use talk2sql_core::message::{ConversationId, Message};
use talk2sql_tools::{DatabaseError, Session, SqlDatabase};

use crate::SharedState;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn db_error(e: DatabaseError) -> ApiError {
    match e {
        DatabaseError::NotFound(_) => api_error(
            StatusCode::BAD_REQUEST,
            "No database uploaded for this conversation",
        ),
        DatabaseError::Open(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        DatabaseError::Query(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn agent_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

fn parse_id(raw: &str) -> Result<ConversationId, ApiError> {
    ConversationId::parse(raw).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

// --- Query ---

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Conversation id
    pub uuid: String,
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub query: Option<String>,
    pub result: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub iterations: u32,
}

async fn open_request_session(
    state: &SharedState,
    payload: &QueryRequest,
) -> Result<(ConversationId, Session), ApiError> {
    let id = parse_id(&payload.uuid)?;
    if payload.prompt.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Prompt must not be empty"));
    }
    let session = Session::open(&state.db_path(&id), state.preview_rows)
        .await
        .map_err(db_error)?;
    Ok((id, session))
}

pub(crate) async fn query_handler(
    State(state): State<SharedState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let (id, session) = open_request_session(&state, &payload).await?;
    info!(conversation_id = %id, streaming = state.streaming, "Query request");

    let result = if state.streaming {
        state
            .executor
            .invoke_streaming(
                &session.registry,
                &id,
                &session.schema_context,
                &payload.prompt,
                None,
            )
            .await
    } else {
        state
            .executor
            .invoke(&session.registry, &id, &session.schema_context, &payload.prompt)
            .await
    };
    let outcome = result.map_err(agent_error)?;

    let (columns, result) = match outcome.context.last_result {
        Some(table) => (table.columns, table.rows),
        None => (Vec::new(), Vec::new()),
    };

    Ok(Json(QueryResponse {
        answer: outcome.result.answer(),
        query: outcome.context.last_query,
        result,
        columns,
        iterations: outcome.iterations,
    }))
}

/// SSE stream of `AgentStreamEvent`s; the last event is `done` or `error`.
pub(crate) async fn query_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (id, session) = open_request_session(&state, &payload).await?;
    info!(conversation_id = %id, "Streaming query request");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let executor = state.executor.clone();
    tokio::spawn(async move {
        // The executor reports failures on the stream itself
        let _ = executor
            .invoke_streaming(
                &session.registry,
                &id,
                &session.schema_context,
                &payload.prompt,
                Some(tx),
            )
            .await;
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type().to_string();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// --- Database upload ---

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub db_name: String,
    pub tables: Vec<String>,
}

/// Store the raw SQLite bytes as the conversation's database.
///
/// The upload is validated under a temporary name and only then renamed
/// over any previous database.
pub(crate) async fn upload_database_handler(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let id = parse_id(&raw_id)?;
    if body.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Empty upload"));
    }

    let io_error = |e: std::io::Error| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    tokio::fs::create_dir_all(&state.db_dir)
        .await
        .map_err(io_error)?;

    let target = state.db_path(&id);
    // Concurrent uploads to one conversation each stage under their own name
    let staging = state
        .db_dir
        .join(format!("{id}.{}.db.upload", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&staging, &body).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(io_error(e));
    }

    let tables = match validate_database(&staging).await {
        Ok(tables) => tables,
        Err(e) => {
            warn!(conversation_id = %id, error = %e, "Rejected database upload");
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Not a valid SQLite database: {e}"),
            ));
        }
    };
    if let Err(e) = tokio::fs::rename(&staging, &target).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(io_error(e));
    }

    info!(conversation_id = %id, bytes = body.len(), tables = tables.len(), "Database uploaded");
    Ok(Json(UploadResponse {
        message: "Database uploaded successfully".into(),
        db_name: format!("{id}.db"),
        tables,
    }))
}

async fn validate_database(path: &std::path::Path) -> Result<Vec<String>, DatabaseError> {
    let db = SqlDatabase::open(path).await?;
    let tables = db.table_names().await;
    db.close().await;
    tables
}

// --- Conversations ---

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

pub(crate) async fn messages_handler(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let id = parse_id(&raw_id)?;
    let messages = state
        .executor
        .history()
        .load(&id)
        .await
        .map_err(|e| agent_error(e.into()))?;

    Ok(Json(MessagesResponse {
        conversation_id: id.to_string(),
        messages,
    }))
}

pub(crate) async fn delete_conversation_handler(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw_id)?;

    let had_history = state
        .executor
        .history()
        .delete(&id)
        .await
        .map_err(|e| agent_error(e.into()))?;

    let had_database = match tokio::fs::remove_file(state.db_path(&id)).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    if !had_history && !had_database {
        return Err(api_error(StatusCode::NOT_FOUND, "Conversation not found"));
    }

    info!(conversation_id = %id, had_history, had_database, "Conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GatewayState, build_router};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use talk2sql_agent::AgentExecutor;
    use talk2sql_core::provider::{ProposalRequest, Provider};
    use talk2sql_core::tool::ToolCall;
    use talk2sql_memory::InMemoryHistory;
    use tower::ServiceExt;

    struct ScriptedProvider {
        calls: Mutex<VecDeque<ToolCall>>,
    }

    impl ScriptedProvider {
        fn new(calls: Vec<ToolCall>) -> Self {
            Self {
                calls: Mutex::new(calls.into()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn propose(&self, _request: &ProposalRequest) -> Result<ToolCall, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::NoToolCall("script exhausted".into()))
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn count_then_answer() -> Vec<ToolCall> {
        vec![
            call(
                "call_1",
                "execute_query",
                serde_json::json!({"sql_query": "SELECT name FROM users ORDER BY id"}),
            ),
            call(
                "call_2",
                "final_answer",
                serde_json::json!({"answer": "There are 3 users", "tools_used": ["execute_query"]}),
            ),
        ]
    }

    async fn write_sample_db(path: &std::path::Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for name in ["ada", "grace", "linus"] {
            sqlx::query("INSERT INTO users (name) VALUES (?)")
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state: SharedState,
    }

    fn fixture(calls: Vec<ToolCall>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let executor = AgentExecutor::new(
            Arc::new(ScriptedProvider::new(calls)),
            Arc::new(InMemoryHistory::new()),
        );
        let state = Arc::new(GatewayState {
            executor: Arc::new(executor),
            db_dir: dir.path().join("databases"),
            preview_rows: 10,
            streaming: false,
            max_upload_bytes: 1024 * 1024,
            cors_allow_any: false,
        });
        Fixture { _dir: dir, state }
    }

    async fn with_database(fixture: &Fixture, id: &str) {
        std::fs::create_dir_all(&fixture.state.db_dir).unwrap();
        let id = ConversationId::parse(id).unwrap();
        write_sample_db(&fixture.state.db_path(&id)).await;
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .unwrap()
            .to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .unwrap()
            .to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn staging_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "upload"))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_then_query() {
        let fixture = fixture(count_then_answer());
        let app = build_router(fixture.state.clone());

        let source = tempfile::tempdir().unwrap();
        let source_path = source.path().join("users.db");
        write_sample_db(&source_path).await;
        let bytes = std::fs::read(&source_path).unwrap();

        let req = Request::builder()
            .method("PUT")
            .uri("/conversations/conv-1/database")
            .body(Body::from(bytes))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["db_name"], "conv-1.db");
        assert_eq!(json["tables"], serde_json::json!(["users"]));
        assert!(staging_files(&fixture.state.db_dir).is_empty());

        let req = post_json(
            "/query",
            serde_json::json!({"uuid": "conv-1", "prompt": "Who are the users?"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["answer"], "There are 3 users");
        assert_eq!(json["query"], "SELECT name FROM users ORDER BY id");
        assert_eq!(json["columns"], serde_json::json!(["name"]));
        assert_eq!(
            json["result"],
            serde_json::json!([["ada"], ["grace"], ["linus"]])
        );
        assert_eq!(json["iterations"], 2);
    }

    #[tokio::test]
    async fn upload_rejects_garbage() {
        let fixture = fixture(vec![]);
        let app = build_router(fixture.state.clone());

        let req = Request::builder()
            .method("PUT")
            .uri("/conversations/conv-1/database")
            .body(Body::from("definitely not sqlite"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let id = ConversationId::parse("conv-1").unwrap();
        assert!(!fixture.state.db_path(&id).exists());
        assert!(staging_files(&fixture.state.db_dir).is_empty());
    }

    #[tokio::test]
    async fn concurrent_uploads_to_one_conversation() {
        let fixture = fixture(vec![]);
        let app = build_router(fixture.state.clone());

        let source = tempfile::tempdir().unwrap();
        let source_path = source.path().join("users.db");
        write_sample_db(&source_path).await;
        let bytes = std::fs::read(&source_path).unwrap();

        let put = |body: Vec<u8>| {
            Request::builder()
                .method("PUT")
                .uri("/conversations/conv-1/database")
                .body(Body::from(body))
                .unwrap()
        };
        let (first, second) = tokio::join!(
            app.clone().oneshot(put(bytes.clone())),
            app.clone().oneshot(put(bytes)),
        );
        assert_eq!(first.unwrap().status(), StatusCode::OK);
        assert_eq!(second.unwrap().status(), StatusCode::OK);

        let id = ConversationId::parse("conv-1").unwrap();
        assert!(fixture.state.db_path(&id).exists());
        assert!(staging_files(&fixture.state.db_dir).is_empty());
    }

    #[tokio::test]
    async fn query_without_database_is_bad_request() {
        let fixture = fixture(count_then_answer());
        let app = build_router(fixture.state.clone());

        let req = post_json("/query", serde_json::json!({"uuid": "nobody", "prompt": "hi"}));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("No database"));
    }

    #[tokio::test]
    async fn query_rejects_path_like_id() {
        let fixture = fixture(vec![]);
        let app = build_router(fixture.state.clone());

        let req = post_json(
            "/query",
            serde_json::json!({"uuid": "../etc/passwd", "prompt": "hi"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let fixture = fixture(vec![]);
        with_database(&fixture, "conv-2").await;
        let app = build_router(fixture.state.clone());

        let req = post_json("/query", serde_json::json!({"uuid": "conv-2", "prompt": "hi"}));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn query_then_messages_then_delete() {
        let fixture = fixture(count_then_answer());
        with_database(&fixture, "conv-3").await;
        let app = build_router(fixture.state.clone());

        let req = post_json(
            "/query",
            serde_json::json!({"uuid": "conv-3", "prompt": "Who are the users?"}),
        );
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/conversations/conv-3/messages")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "Who are the users?");

        let req = Request::builder()
            .method("DELETE")
            .uri("/conversations/conv-3")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let id = ConversationId::parse("conv-3").unwrap();
        assert!(!fixture.state.db_path(&id).exists());

        let req = Request::builder()
            .method("DELETE")
            .uri("/conversations/conv-3")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_ends_with_done() {
        let fixture = fixture(count_then_answer());
        with_database(&fixture, "conv-4").await;
        let app = build_router(fixture.state.clone());

        let req = post_json(
            "/query/stream",
            serde_json::json!({"uuid": "conv-4", "prompt": "Who are the users?"}),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let text = body_text(resp).await;
        let events: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert!(events.contains(&"tool_call"));
        assert!(events.contains(&"tool_result"));
        assert_eq!(events.last(), Some(&"done"));
        assert!(text.contains("There are 3 users"));
    }
}
