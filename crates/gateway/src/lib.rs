//! HTTP API gateway for Talk2SQL.
//!
//! Exposes the upload, query, streaming and conversation endpoints.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    response::Json,
    routing::{get, post, put},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

use talk2sql_agent::AgentExecutor;
use talk2sql_config::AppConfig;
use talk2sql_core::history::HistoryStore;
use talk2sql_core::message::ConversationId;
use talk2sql_core::provider::Provider;
use talk2sql_memory::JsonFileHistory;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub executor: Arc<AgentExecutor>,
    /// Where uploaded databases live, one `<id>.db` per conversation
    pub db_dir: PathBuf,
    pub preview_rows: usize,
    /// Drive `/query` through the streaming bridge
    pub streaming: bool,
    pub max_upload_bytes: usize,
    pub cors_allow_any: bool,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            executor: Arc::new(executor_from_config(config, provider, history)),
            db_dir: config.storage.db_dir(),
            preview_rows: config.agent.preview_rows,
            streaming: config.agent.streaming,
            max_upload_bytes: config.gateway.max_upload_mb * 1024 * 1024,
            cors_allow_any: config.gateway.cors_allow_any,
        }
    }

    /// Database file of a conversation.
    pub fn db_path(&self, id: &ConversationId) -> PathBuf {
        self.db_dir.join(format!("{id}.db"))
    }
}

/// Build an executor with the loop settings from `[agent]`.
pub fn executor_from_config(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    history: Arc<dyn HistoryStore>,
) -> AgentExecutor {
    AgentExecutor::new(provider, history)
        .with_max_iterations(config.agent.max_iterations)
        .with_iteration_timeout(Duration::from_secs(config.agent.iteration_timeout_secs))
}

/// Build the Axum router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/query", post(api::query_handler))
        .route("/query/stream", post(api::query_stream_handler))
        .route("/conversations/{id}/database", put(api::upload_database_handler))
        .route("/conversations/{id}/messages", get(api::messages_handler))
        .route(
            "/conversations/{id}",
            axum::routing::delete(api::delete_conversation_handler),
        )
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    if state.cors_allow_any {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Start the gateway server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = talk2sql_providers::build_from_config(&config)?;
    let history: Arc<dyn HistoryStore> =
        Arc::new(JsonFileHistory::new(config.storage.memory_dir()));
    let state = Arc::new(GatewayState::from_config(&config, provider, history));
    tokio::fs::create_dir_all(&state.db_dir).await?;

    let app = build_router(state);

    info!(addr = %addr, model = %config.provider.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
    })
}
