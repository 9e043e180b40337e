//! JSON HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Source-balanced retrieval: `{input, k?}` → `{results}` |
//! | `POST` | `/ask` | Grounded answer: `{input}` → `{answer, sources}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "input must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `timeout` (504),
//! `internal` (500). A timeout is never reported as an empty result.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::error::RagError;
use balanced_rag_core::store::VectorStore;

use crate::ask::answer_question;
use crate::completion::{create_completer, Completer};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::ingest_configured;
use crate::search::query_passages;
use crate::sqlite_store::SqliteStore;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub completer: Arc<dyn Completer>,
}

impl AppState {
    /// Build the state from configuration: SQLite store plus the configured
    /// gateways.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(config).await?;
        Ok(Self {
            config: Arc::new(config.clone()),
            store: Arc::new(store),
            embedder: create_embedder(&config.embedding)?,
            completer: create_completer(&config.completion)?,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind`, optionally ingesting first.
///
/// A failed startup ingestion is logged and the server still starts.
pub async fn run_server(config: &Config, ingest_on_start: bool) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;

    if ingest_on_start {
        let options = config.ingest_options();
        if let Err(e) = ingest_configured(
            config,
            state.store.as_ref(),
            state.embedder.as_ref(),
            &options,
        )
        .await
        {
            tracing::error!(error = %e, "startup ingestion failed");
        }
    }

    serve(state, &config.server.bind).await
}

/// Bind `bind` and serve the router until the process ends.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");
    println!("Balanced RAG server listening on http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        match err {
            RagError::InvalidQuery(_) => {
                app_error(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            RagError::UpstreamTimeout { .. } => {
                tracing::error!(error = %message, "request timed out");
                app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RagError::UpstreamFailure { .. } => {
                tracing::error!(error = %message, "upstream call failed");
                app_error(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            RagError::Dataset(_) => {
                tracing::error!(error = %message, "request failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Reject empty or oversized input before any upstream call.
fn check_input(input: &str, max_chars: usize) -> Result<(), RagError> {
    if input.trim().is_empty() {
        return Err(RagError::InvalidQuery("input must not be empty".to_string()));
    }
    let chars = input.chars().count();
    if chars > max_chars {
        return Err(RagError::InvalidQuery(format!(
            "input is {} characters, limit is {}",
            chars, max_chars
        )));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    input: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct QueryHit {
    text: String,
    source: String,
    score: f64,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<QueryHit>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    check_input(&req.input, state.config.server.max_input_chars)?;

    let passages = query_passages(
        state.store.as_ref(),
        state.embedder.as_ref(),
        &state.config.retrieval,
        &req.input,
        req.k,
    )
    .await?;

    let results = passages
        .into_iter()
        .map(|p| QueryHit {
            text: p.text,
            source: p.source,
            score: p.score,
        })
        .collect();

    Ok(Json(QueryResponse { results }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    input: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    check_input(&req.input, state.config.server.max_input_chars)?;
    tracing::info!(chars = req.input.chars().count(), "ask received");

    let answer = answer_question(
        state.store.as_ref(),
        state.embedder.as_ref(),
        state.completer.as_ref(),
        &state.config.retrieval,
        &req.input,
    )
    .await?;

    Ok(Json(AskResponse {
        answer: answer.answer,
        sources: answer.sources,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input_rejects_blank_and_long() {
        assert!(matches!(
            check_input("   ", 10),
            Err(RagError::InvalidQuery(_))
        ));
        assert!(matches!(
            check_input("ééééééééééé", 10),
            Err(RagError::InvalidQuery(_))
        ));
        assert!(check_input("éééééééééé", 10).is_ok());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (RagError::InvalidQuery("x".into()), StatusCode::BAD_REQUEST, "bad_request"),
            (RagError::timeout("embedding", 30), StatusCode::GATEWAY_TIMEOUT, "timeout"),
            (RagError::upstream("completion", "boom"), StatusCode::BAD_GATEWAY, "upstream_error"),
            (RagError::Dataset("bad".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        ];
        for (err, status, code) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }
}
