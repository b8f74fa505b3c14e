//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Liveness probe |
//! | `POST` | `/upload-document` | Multipart `file` (PDF or CSV) → ingest |
//! | `POST` | `/ask` | `{query, k?}` → grounded answer with citations |
//! | `GET`  | `/health/{equipment_id}` | Live readings + failure probability |
//! | `POST` | `/agent` | `{question}` → tool-using agent answer |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "..." } }
//! ```
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | missing field / bad multipart | 400 | `bad_request` |
//! | not PDF or CSV | 400 | `unsupported_format` |
//! | unknown equipment | 404 | `not_found` |
//! | unreadable document | 422 | `extraction_failed` |
//! | embedding / LLM / database failure | 502 | `external_service` |
//! | anything else | 500 | `internal` |
//!
//! # CORS
//!
//! Permissive CORS is only installed when `server.cors` is set (or
//! `LOCAL_MODE` is present in the environment), for local dashboards.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::error::AssistantError;
use crate::models::SensorReadings;
use crate::rag::AskResponse;
use crate::services::Services;

/// Builds the router over already-constructed services.
pub fn router(services: Services, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/upload-document", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/health/{equipment_id}", get(handle_equipment_health))
        .route("/agent", post(handle_agent))
        .layer(DefaultBodyLimit::max(config.max_upload_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(services);

    if config.cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Starts the HTTP server on `server.bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = router(services, &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, cors = config.server.cors, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

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

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Maps domain errors to status codes; everything unrecognised is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<AssistantError>() {
            Some(AssistantError::UnsupportedFormat(_)) => {
                app_error(StatusCode::BAD_REQUEST, "unsupported_format", message)
            }
            Some(AssistantError::UnknownEquipment(_)) => not_found(message),
            Some(AssistantError::Extraction(_)) => {
                app_error(StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed", message)
            }
            Some(AssistantError::ExternalService { .. }) => {
                tracing::warn!(error = %message, "upstream failure");
                app_error(StatusCode::BAD_GATEWAY, "external_service", message)
            }
            _ => {
                tracing::error!(error = %message, "request failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ============ GET /healthz ============

async fn handle_healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============ POST /upload-document ============

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    chunks: usize,
    file_type: &'static str,
}

async fn handle_upload(
    State(services): State<Services>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| app_error(e.status(), "bad_request", e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(bad_request("file field has no filename"));
        }
        // Reject before reading the body
        crate::extract::FileType::from_filename(&filename).map_err(anyhow::Error::from)?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| app_error(e.status(), "bad_request", e.body_text()))?;

        let report = services
            .assistant
            .ingest_bytes(&filename, bytes.to_vec())
            .await?;

        return Ok(Json(UploadResponse {
            status: "success",
            chunks: report.chunks,
            file_type: report.file_type.suffix(),
        }));
    }

    Err(bad_request("multipart field 'file' is required"))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_ask(
    State(services): State<Services>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let response = services
        .assistant
        .answer(&req.query, req.k, services.llm.as_ref())
        .await?;
    Ok(Json(response))
}

// ============ GET /health/{equipment_id} ============

#[derive(Serialize)]
struct EquipmentHealth {
    equipment_id: String,
    sensors: SensorReadings,
    failure_probability: f64,
}

async fn handle_equipment_health(
    State(services): State<Services>,
    Path(equipment_id): Path<String>,
) -> Result<Json<EquipmentHealth>, AppError> {
    let sensors = services
        .sensors
        .fetch(&equipment_id)
        .await?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AssistantError::UnknownEquipment(equipment_id.clone()))
        .map_err(anyhow::Error::from)?;

    let failure_probability = services.predictor.predict(&sensors);

    Ok(Json(EquipmentHealth {
        equipment_id,
        sensors,
        failure_probability,
    }))
}

// ============ POST /agent ============

#[derive(Deserialize)]
struct AgentRequest {
    question: String,
}

#[derive(Serialize)]
struct AgentResponse {
    answer: String,
}

async fn handle_agent(
    State(services): State<Services>,
    Json(req): Json<AgentRequest>,
) -> Result<Json<AgentResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let outcome = services.agent().run(&req.question).await?;
    tracing::info!(steps = outcome.steps, "agent finished");
    Ok(Json(AgentResponse {
        answer: outcome.answer,
    }))
}
