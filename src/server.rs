//! HTTP API server.
//!
//! Exposes the retrieval core and the advisor pipeline as a JSON API for
//! the desktop client.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Rate class | Description |
//! |--------|------|------|------------|-------------|
//! | `POST` | `/index` | bearer | low | Index a repository |
//! | `POST` | `/search` | bearer | medium | Ranked code search |
//! | `POST` | `/transcribe` | bearer | high | Speech to text |
//! | `POST` | `/advise` | bearer | low | Generate a talking point |
//! | `POST` | `/screenshot` | bearer | medium | Store a session screenshot |
//! | `GET` | `/repos` | bearer | medium | List active repositories |
//! | `DELETE` | `/repos/{repo_id}` | bearer | low | Soft-delete a repository |
//! | `GET` | `/health` | none | — | Readiness flags |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `invalid_input` (400), `unauthorized` (401), `path_not_allowed`
//! (403), `not_found` (404), `rate_limited` (429, plus `retry_after_secs`),
//! `unavailable` (503), `internal` (500).
//!
//! The authenticated identity is the only source of `user_id`; request
//! bodies never carry one.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support the desktop
//! app's embedded webview and local development clients.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::advisor::advise;
use crate::auth::TokenValidator;
use crate::config::Config;
use crate::context::ContextStore;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::ApiError;
use crate::indexer::index_repository;
use crate::migrate;
use crate::models::{
    AdviceResult, IndexMode, Repository, Screenshot, SearchHit, SkippedFile, TranscribeResult,
};
use crate::rate_limit::RateLimiter;
use crate::registry::RepoRegistry;
use crate::sandbox::Sandbox;
use crate::search::search_chunks;
use crate::speech::{create_speech_backend, run_transcription, SpeechBackend};
use crate::store::sqlite::SqliteIndex;
use crate::store::VectorIndex;

/// Session used when the client does not name one.
const DEFAULT_SESSION: &str = "default";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub index: Arc<dyn VectorIndex>,
    pub registry: Arc<RepoRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub speech: Arc<dyn SpeechBackend>,
    pub context: Arc<ContextStore>,
    pub sandbox: Arc<Sandbox>,
    pub validator: Arc<TokenValidator>,
    pub limiter: Arc<RateLimiter>,
}

/// Connect storage, run migrations, and wire up every pipeline dependency.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = create_embedder(&config.embedding)?;
    let speech = create_speech_backend(&config.speech)?;

    Ok(AppState {
        config: Arc::new(config.clone()),
        index: Arc::new(SqliteIndex::new(pool.clone())),
        registry: Arc::new(RepoRegistry::new(pool)),
        embedder,
        speech,
        context: Arc::new(ContextStore::new()),
        sandbox: Arc::new(Sandbox::new(&config.sandbox.allowed_roots)),
        validator: Arc::new(TokenValidator::new(&config.auth)),
        limiter: Arc::new(RateLimiter::new()),
    })
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/index", post(handle_index))
        .route("/search", post(handle_search))
        .route("/transcribe", post(handle_transcribe))
        .route("/advise", post(handle_advise))
        .route("/screenshot", post(handle_screenshot))
        .route("/repos", get(handle_list_repos))
        .route("/repos/{repo_id}", delete(handle_delete_repo))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the API server and run until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = build_state(config).await?;
    let app = build_router(state);

    tracing::info!(bind = %bind_addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PathNotAllowed(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retry_after_secs = match &self {
            ApiError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                retry_after_secs,
            },
        };

        (status, Json(body)).into_response()
    }
}

// ============ Auth ============

/// Extract and verify the bearer token; the `sub` claim becomes the
/// `user_id` for every downstream tenancy check.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("expected a Bearer token".to_string()))?;

    state.validator.user_id(token)
}

// ============ POST /index ============

#[derive(Deserialize)]
struct IndexRequest {
    root_path: String,
    mode: IndexMode,
    #[serde(default)]
    selection: Vec<String>,
}

#[derive(Serialize)]
struct IndexResponse {
    repo_id: String,
    files_indexed: u64,
    chunks_written: u64,
    skipped: Vec<SkippedFile>,
}

async fn handle_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state
        .limiter
        .check(&user_id, "index", state.config.limits.index_per_min)?;

    let outcome = index_repository(
        &state.config,
        &state.sandbox,
        &state.registry,
        state.index.as_ref(),
        state.embedder.as_ref(),
        &user_id,
        &req.root_path,
        req.mode,
        &req.selection,
    )
    .await?;

    Ok(Json(IndexResponse {
        repo_id: outcome.repo_id,
        files_indexed: outcome.report.files_indexed,
        chunks_written: outcome.report.chunks_written,
        skipped: outcome.report.skipped,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    repo_id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    query: String,
    latency_ms: f64,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state
        .limiter
        .check(&user_id, "search", state.config.limits.search_per_min)?;

    let started = Instant::now();
    let results = search_chunks(
        &state.config,
        &state.registry,
        state.index.as_ref(),
        state.embedder.as_ref(),
        &user_id,
        &req.query,
        req.top_k,
        req.repo_id.as_deref(),
    )
    .await?;

    Ok(Json(SearchResponse {
        results,
        query: req.query,
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

// ============ POST /transcribe ============

#[derive(Deserialize)]
struct TranscribeRequest {
    audio_base64: String,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_transcribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TranscribeRequest>,
) -> Result<Json<TranscribeResult>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state.limiter.check(
        &user_id,
        "transcribe",
        state.config.limits.transcribe_per_min,
    )?;

    let audio = BASE64
        .decode(&req.audio_base64)
        .map_err(|_| ApiError::InvalidInput("audio_base64 is not valid base64".to_string()))?;

    let result = run_transcription(
        &state.config.speech,
        state.speech.as_ref(),
        &audio,
        req.sample_rate,
    )
    .await?;

    // Speech activity feeds the session context; silence does not
    // overwrite the last useful segment.
    if !result.text.is_empty() {
        let session_id = req.session_id.as_deref().unwrap_or(DEFAULT_SESSION);
        state
            .context
            .record_transcript(&user_id, session_id, &result.text);
    }

    Ok(Json(result))
}

// ============ POST /screenshot ============

#[derive(Deserialize)]
struct ScreenshotRequest {
    image_base64: String,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ScreenshotResponse {
    session_id: String,
    screenshot_version: u64,
    size_bytes: usize,
}

async fn handle_screenshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScreenshotRequest>,
) -> Result<Json<ScreenshotResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state.limiter.check(
        &user_id,
        "screenshot",
        state.config.limits.screenshot_per_min,
    )?;

    let bytes = BASE64
        .decode(&req.image_base64)
        .map_err(|_| ApiError::InvalidInput("image_base64 is not valid base64".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::InvalidInput("image payload is empty".to_string()));
    }
    if bytes.len() > state.config.advisor.max_image_bytes {
        return Err(ApiError::InvalidInput(format!(
            "image exceeds maximum size of {} bytes",
            state.config.advisor.max_image_bytes
        )));
    }

    let session_id = req
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let size_bytes = bytes.len();
    let shot = Screenshot {
        image_base64: req.image_base64,
        media_type: req.media_type.unwrap_or_else(|| "image/jpeg".to_string()),
        size_bytes,
    };

    let version = state.context.record_screenshot(&user_id, &session_id, shot);

    Ok(Json(ScreenshotResponse {
        session_id,
        screenshot_version: version,
        size_bytes,
    }))
}

// ============ POST /advise ============

#[derive(Deserialize)]
struct AdviseRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    meeting_context: Option<String>,
}

async fn handle_advise(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdviseRequest>,
) -> Result<Json<AdviceResult>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state
        .limiter
        .check(&user_id, "advise", state.config.limits.advise_per_min)?;

    let session_id = req.session_id.as_deref().unwrap_or(DEFAULT_SESSION);
    let result = advise(
        &state.config,
        &state.context,
        &state.registry,
        state.index.as_ref(),
        state.embedder.as_ref(),
        &user_id,
        session_id,
        req.meeting_context.as_deref(),
    )
    .await?;

    Ok(Json(result))
}

// ============ GET /repos, DELETE /repos/{repo_id} ============

#[derive(Serialize)]
struct ReposResponse {
    repositories: Vec<Repository>,
}

async fn handle_list_repos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReposResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state
        .limiter
        .check(&user_id, "repos", state.config.limits.repos_per_min)?;

    let repositories = state
        .registry
        .list_active(&user_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ReposResponse { repositories }))
}

async fn handle_delete_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(repo_id): Path<String>,
) -> Result<Json<ReposResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    state
        .limiter
        .check(&user_id, "repos", state.config.limits.repos_per_min)?;

    let removed = state
        .registry
        .deactivate(&user_id, &repo_id)
        .await
        .map_err(ApiError::Internal)?;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "no active repository with id: {repo_id}"
        )));
    }

    let repositories = state
        .registry
        .list_active(&user_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ReposResponse { repositories }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    embedding_ready: bool,
    speech_ready: bool,
    index_ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index_ready = sqlx::query("SELECT 1")
        .fetch_one(state.registry.pool())
        .await
        .is_ok();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embedding_ready: state.embedder.is_ready(),
        speech_ready: state.speech.is_ready(),
        index_ready,
    })
}
