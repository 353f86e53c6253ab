//! HTTP API for document upload, retrieval-augmented Q&A, and history.
//!
//! Caller identity comes from the `x-user` header; an authenticating proxy
//! in front of this service is assumed and the identity is treated as an
//! opaque string. Every handler is scoped to that identity.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Multipart upload, one ingest per file |
//! | `GET`  | `/documents` | List the caller's documents |
//! | `GET`  | `/document_file/{id}` | Serve the stored original file |
//! | `DELETE` | `/documents/{id}` | Delete a document and its vectors |
//! | `POST` | `/ask` | Answer a question from the caller's documents |
//! | `GET`  | `/chat/history` | Chat history, newest first |
//! | `DELETE` | `/chat/history/{id}` | Delete one history entry |
//! | `DELETE` | `/chat/history` | Clear the caller's history |
//! | `GET`  | `/settings/llm` | Current per-user LLM model |
//! | `PUT`  | `/settings/llm` | Set per-user LLM model/key |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `unsupported_format`
//! (400), `missing_credential` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer;
use crate::chat;
use crate::config::Config;
use crate::db;
use crate::documents;
use crate::embedding::HttpEmbedder;
use crate::extract::ExtractError;
use crate::llm::{self, GenerativeClient, LlmError};
use crate::migrate;
use crate::pipeline;
use crate::structure::StructureError;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: sqlx::SqlitePool,
}

/// Caller identity extracted from the `x-user` header.
struct Identity(String);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get("x-user")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| bad_request("missing x-user header"))?;
        Ok(Identity(user.to_string()))
    }
}

/// Starts the HTTP server: opens the database, runs migrations, binds to
/// `[server].bind`, and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    info!(%bind_addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/documents", post(handle_upload).get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/document_file/{id}", get(handle_document_file))
        .route("/ask", post(handle_ask))
        .route(
            "/chat/history",
            get(handle_history).delete(handle_clear_history),
        )
        .route("/chat/history/{id}", delete(handle_delete_history))
        .route("/settings/llm", put(handle_set_llm).get(handle_get_llm))
        .route("/health", get(handle_health))
        .with_state(state)
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

/// Internal error type that converts into an HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map domain errors to the appropriate status/code. Typed errors are
/// inspected by downcast so the mapping does not depend on message text.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(LlmError::MissingCredential) = err.downcast_ref::<LlmError>() {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "missing_credential".to_string(),
            message: err.to_string(),
        };
    }
    if let Some(ExtractError::UnsupportedFormat(ext)) = err.downcast_ref::<ExtractError>() {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "unsupported_format".to_string(),
            message: format!("unsupported file format: {}", ext),
        };
    }
    if let Some(StructureError::Parse(_)) = err.downcast_ref::<StructureError>() {
        return internal(err.to_string());
    }
    error!(error = %err, "request failed");
    internal(err.to_string())
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

// ============ POST /documents ============

#[derive(Serialize)]
struct UploadedDocument {
    filename: String,
    document_id: String,
}

#[derive(Serialize)]
struct UploadResponse {
    documents: Vec<UploadedDocument>,
}

/// Multipart upload. Text field `document_url` (optional) applies to every
/// file in the request; each `files` part runs through the full ingestion
/// pipeline.
async fn handle_upload(
    State(state): State<AppState>,
    Identity(owner): Identity,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let dir = tempfile::tempdir().map_err(|e| internal(e.to_string()))?;

    let mut document_url: Option<String> = None;
    let mut files: Vec<(String, std::path::PathBuf)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("document_url") => {
                let value = field.text().await.map_err(|e| bad_request(e.to_string()))?;
                if !value.trim().is_empty() {
                    document_url = Some(value);
                }
            }
            _ => {
                let file_name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .ok_or_else(|| bad_request("file part missing filename"))?;
                let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                let path = dir.path().join(&file_name);
                std::fs::write(&path, &bytes).map_err(|e| internal(e.to_string()))?;
                files.push((file_name, path));
            }
        }
    }

    if files.is_empty() {
        return Err(bad_request("no files in upload"));
    }

    let chat_model = GenerativeClient::for_owner(&state.pool, &state.config.llm, &owner)
        .await
        .map_err(classify_error)?;
    let embedder = HttpEmbedder::new(&state.config.embedding).map_err(classify_error)?;

    let mut uploaded = Vec::with_capacity(files.len());
    for (file_name, path) in files {
        let document_id = pipeline::ingest_file(
            &state.pool,
            &state.config,
            &chat_model,
            &embedder,
            &path,
            &owner,
            document_url.as_deref(),
        )
        .await
        .map_err(classify_error)?;
        uploaded.push(UploadedDocument {
            filename: file_name,
            document_id,
        });
    }

    Ok(Json(UploadResponse {
        documents: uploaded,
    }))
}

/// Keep only the final path component so an uploaded name cannot escape
/// the staging directory.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<documents::StoredDocument>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> Result<Json<DocumentListResponse>, AppError> {
    let docs = documents::list(&state.pool, &owner)
        .await
        .map_err(classify_error)?;
    Ok(Json(DocumentListResponse { documents: docs }))
}

// ============ GET /document_file/{id} ============

async fn handle_document_file(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (mime, bytes) = documents::get_file(&state.pool, &id, &owner)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;

    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

// ============ DELETE /documents/{id} ============

async fn handle_delete_document(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = pipeline::delete_document(&state.pool, &owner, &id)
        .await
        .map_err(classify_error)?;
    if !removed {
        return Err(not_found(format!("no document with id: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(request): Json<AskRequest>,
) -> Result<Json<answer::AnswerResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let chat_model = GenerativeClient::for_owner(&state.pool, &state.config.llm, &owner)
        .await
        .map_err(classify_error)?;
    let embedder = HttpEmbedder::new(&state.config.embedding).map_err(classify_error)?;

    let response = answer::generate_answer(
        &state.pool,
        &state.config,
        &chat_model,
        &embedder,
        &request.query,
        &owner,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(response))
}

// ============ Chat history ============

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<chat::ChatHistoryEntry>,
}

async fn handle_history(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> Result<Json<HistoryResponse>, AppError> {
    let history = chat::list(&state.pool, &owner)
        .await
        .map_err(classify_error)?;
    Ok(Json(HistoryResponse { history }))
}

async fn handle_delete_history(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = chat::delete(&state.pool, &owner, id)
        .await
        .map_err(classify_error)?;
    if !removed {
        return Err(not_found(format!("no history entry with id: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = chat::clear(&state.pool, &owner)
        .await
        .map_err(classify_error)?;
    Ok(Json(serde_json::json!({ "deleted": removed })))
}

// ============ LLM settings ============

#[derive(Deserialize)]
struct LlmSettingsRequest {
    llm_model: Option<String>,
    llm_api_key: Option<String>,
}

async fn handle_set_llm(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(request): Json<LlmSettingsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.llm_model.is_none() && request.llm_api_key.is_none() {
        return Err(bad_request("nothing to update"));
    }
    llm::set_user_llm(
        &state.pool,
        &owner,
        request.llm_model.as_deref(),
        request.llm_api_key.as_deref(),
    )
    .await
    .map_err(classify_error)?;
    Ok(Json(serde_json::json!({ "updated": true })))
}

#[derive(Serialize)]
struct LlmSettingsResponse {
    /// Model in effect for this user (their override, else the default).
    llm_model: String,
    has_api_key: bool,
}

async fn handle_get_llm(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> Result<Json<LlmSettingsResponse>, AppError> {
    let settings = llm::get_user_llm(&state.pool, &owner)
        .await
        .map_err(classify_error)?;
    Ok(Json(LlmSettingsResponse {
        llm_model: settings
            .llm_model
            .unwrap_or_else(|| state.config.llm.model.clone()),
        has_api_key: settings.llm_api_key.is_some(),
    }))
}
