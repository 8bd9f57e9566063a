//! HTTP API.
//!
//! Exposes generation, dictionary management, export and chat as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/dictionaries/generate` | Start a generation run |
//! | `GET`    | `/dictionaries` | List dictionaries, newest first (`?connection_id=`) |
//! | `GET`    | `/dictionaries/{id}` | Full dictionary read model |
//! | `DELETE` | `/dictionaries/{id}` | Delete one dictionary |
//! | `GET`    | `/dictionaries/{id}/export/{format}` | `json` or `markdown` export |
//! | `POST`   | `/chat/query` | Ask a question about a dictionary |
//! | `GET`    | `/chat/suggestions/{id}` | Starter questions for a dictionary |
//! | `POST`   | `/connections/{id}/cancel` | Cancel the connection's running generation |
//! | `GET`    | `/connections/{id}/generation` | Status of the connection's latest run |
//!
//! `POST /dictionaries/generate` runs in the background and answers `202`
//! unless the body sets `"wait": true`, in which case it answers with the
//! stored dictionary's summary. A background run's outcome (dictionary id,
//! or failure code and message) is read from `/connections/{id}/generation`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "already_running", "message": "a generation is already running for connection 'shop'" } }
//! ```
//!
//! `code` is the `category()` of the underlying error.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use schemadoc_core::export::{render, ExportFormat};
use schemadoc_core::models::{Dictionary, DictionarySummary, SuggestedQuestion};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatQuery, ChatResponse};
use crate::config::Config;
use crate::error::{ChatError, PipelineError};
use crate::pipeline::{GenerateRequest, GenerationStatus};
use crate::progress::NoProgress;
use crate::services::Services;

/// Start the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = router(services);

    let bind_addr = config.server.bind.clone();
    tracing::info!(bind = %bind_addr, "schemadoc server listening");
    println!("schemadoc listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over already-wired services.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/dictionaries/generate", post(handle_generate))
        .route("/dictionaries", get(handle_list))
        .route("/dictionaries/{id}", get(handle_get).delete(handle_delete))
        .route("/dictionaries/{id}/export/{format}", get(handle_export))
        .route("/chat/query", post(handle_chat))
        .route("/chat/suggestions/{id}", get(handle_suggestions))
        .route("/connections/{id}/cancel", post(handle_cancel))
        .route("/connections/{id}/generation", get(handle_generation_status))
        .layer(cors)
        .with_state(services)
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

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Connection(_) => StatusCode::BAD_GATEWAY,
            PipelineError::NoTablesExtracted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::AlreadyRunning(_) | PipelineError::Cancelled(_) => StatusCode::CONFLICT,
            PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.category(), err.to_string())
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::NoDictionarySelected => StatusCode::BAD_REQUEST,
            ChatError::NoDictionaries | ChatError::DictionaryNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.category(), err.to_string())
    }
}

fn dictionary_not_found(id: &str) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "dictionary_not_found",
        format!("Dictionary {} was not found.", id),
    )
}

async fn load(services: &Services, id: &str) -> Result<Dictionary, AppError> {
    services
        .store
        .get(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| dictionary_not_found(id))
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

// ============ POST /dictionaries/generate ============

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(flatten)]
    request: GenerateRequest,
    #[serde(default)]
    wait: bool,
}

#[derive(Serialize)]
struct GenerateStarted {
    connection_id: String,
    status: &'static str,
    status_url: String,
}

async fn handle_generate(
    State(services): State<Services>,
    Json(body): Json<GenerateBody>,
) -> Result<Response, AppError> {
    let request = body.request;
    let connection_id = request.connection_id.clone();

    if services.pipeline.resolver().resolve(&connection_id).is_none() {
        return Err(PipelineError::ConnectionNotFound(connection_id).into());
    }
    if services.pipeline.is_running(&connection_id) {
        return Err(PipelineError::AlreadyRunning(connection_id).into());
    }

    if body.wait {
        let dictionary = services.pipeline.generate(&request, &NoProgress).await?;
        return Ok(Json(dictionary.summary()).into_response());
    }

    // the outcome lands in the pipeline's status map
    let pipeline = services.pipeline.clone();
    tokio::spawn(async move {
        let _ = pipeline.generate(&request, &NoProgress).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateStarted {
            status_url: format!("/connections/{}/generation", connection_id),
            connection_id,
            status: "started",
        }),
    )
        .into_response())
}

// ============ Dictionaries ============

#[derive(Deserialize)]
struct ListParams {
    connection_id: Option<String>,
}

#[derive(Serialize)]
struct ListResponse {
    dictionaries: Vec<DictionarySummary>,
}

async fn handle_list(
    State(services): State<Services>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let dictionaries = services
        .store
        .list(params.connection_id.as_deref())
        .await
        .map_err(AppError::internal)?;
    Ok(Json(ListResponse { dictionaries }))
}

async fn handle_get(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<Dictionary>, AppError> {
    Ok(Json(load(&services, &id).await?))
}

async fn handle_delete(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if services.store.delete(&id).await.map_err(AppError::internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(dictionary_not_found(&id))
    }
}

async fn handle_export(
    State(services): State<Services>,
    Path((id, format)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let format: ExportFormat = format
        .parse()
        .map_err(|e: String| AppError::new(StatusCode::BAD_REQUEST, "bad_request", e))?;
    let dictionary = load(&services, &id).await?;
    let body = render(&dictionary, format).map_err(AppError::internal)?;
    let disposition = format!(
        "attachment; filename=\"{}_dictionary.{}\"",
        dictionary.database_name,
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ============ Chat ============

async fn handle_chat(
    State(services): State<Services>,
    Json(query): Json<ChatQuery>,
) -> Result<Json<ChatResponse>, AppError> {
    if query.question.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "question must not be empty",
        ));
    }
    Ok(Json(services.engine.answer(&query).await?))
}

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<SuggestedQuestion>,
}

async fn handle_suggestions(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let suggestions = services.engine.suggestions(&id).await?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

// ============ POST /connections/{id}/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    connection_id: String,
    cancelled: bool,
}

async fn handle_cancel(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = services.pipeline.cancel(&id);
    Json(CancelResponse {
        connection_id: id,
        cancelled,
    })
}

// ============ GET /connections/{id}/generation ============

#[derive(Serialize)]
struct GenerationStatusResponse {
    connection_id: String,
    running: bool,
    #[serde(flatten)]
    last_run: GenerationStatus,
}

async fn handle_generation_status(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<GenerationStatusResponse>, AppError> {
    let last_run = services.pipeline.status(&id);
    if last_run == GenerationStatus::Idle && services.pipeline.resolver().resolve(&id).is_none() {
        return Err(PipelineError::ConnectionNotFound(id).into());
    }
    Ok(Json(GenerationStatusResponse {
        running: services.pipeline.is_running(&id),
        connection_id: id,
        last_run,
    }))
}
