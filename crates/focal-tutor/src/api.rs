//! HTTP API for the Focal tutoring server.
//!
//! # Endpoints
//!
//! - `POST /api/generate` - Classify a question and stream the answer as plain text
//! - `GET /api/health` - Report the configured provider and model
//!
//! A successful generation answers `200` with `content-type: text/plain` and
//! the resolved category in the [`CATEGORY_HEADER`] header, then streams the
//! answer text. Validation failures answer `400`; generation failures that
//! happen before the first chunk answer `502`. A failure after streaming has
//! begun ends the body with a failure frame: a [`FAILURE_MARKER`] byte
//! followed by an [`ErrorResponse`] as JSON. Dropping the connection cancels
//! the model call.
//!
//! # Example
//!
//! ```no_run
//! use focal_tutor::{create_router, AppState, Config};
//!
//! # async fn example() -> focal_tutor::Result<()> {
//! let config = Config::load()?;
//! let state = AppState::new(config.clone(), config.gateway()?);
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::Category;
use crate::config::Config;
use crate::error::{LlmErrorKind, TutorError};
use crate::gateway::{GenerationGateway, GenerationRequest};
use crate::image::ImagePayload;
use crate::model::HistoryEntry;
use crate::options::{ResponseOptions, SectionSet, Sliders};

/// Response header carrying the resolved category.
pub const CATEGORY_HEADER: &str = "x-focal-category";

/// Byte that separates answer text from a trailing failure frame.
///
/// Answer text never contains it; the server strips it from model output.
pub const FAILURE_MARKER: u8 = 0;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Client-side turn identifier, echoed in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<Uuid>,
    /// The question text. May be empty when images are attached.
    #[serde(default)]
    pub prompt: String,
    /// Section toggles; the server defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SectionSet>,
    /// Tone sliders; the server defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sliders: Option<Sliders>,
    /// Base64 images, bare or as `data:` URLs, in order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Prior completed exchanges, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Response body for `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Name of the answering backend.
    pub provider: String,
    /// Configured answering model.
    pub model: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Category resolved before a generation failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Kind of model failure, for generation errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LlmErrorKind>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Gateway used for every request.
    pub gateway: GenerationGateway,
}

impl AppState {
    /// Creates a new `AppState`.
    #[must_use]
    pub const fn new(config: Config, gateway: GenerationGateway) -> Self {
        Self { config, gateway }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The body could not be parsed.
    Rejected(JsonRejection),
    /// A tutoring stage failed before the response head was sent.
    Tutor(TutorError),
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self::Tutor(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, category, kind) = match self {
            Self::Rejected(rejection) => {
                let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, rejection.body_text(), None, None)
            }
            Self::Tutor(err) => match &err {
                TutorError::ValidationError { message } => {
                    (StatusCode::BAD_REQUEST, message.clone(), None, None)
                }
                TutorError::GenerationError { category, kind, .. } => (
                    StatusCode::BAD_GATEWAY,
                    err.user_message(),
                    *category,
                    Some(*kind),
                ),
                TutorError::Cancelled => {
                    (StatusCode::SERVICE_UNAVAILABLE, err.user_message(), None, None)
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    err.user_message(),
                    None,
                    None,
                ),
            },
        };

        (
            status,
            Json(ErrorResponse {
                error,
                category,
                kind,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// The router carries a request-body limit from the configuration, CORS
/// middleware for browser clients and tracing middleware for request logging.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(CATEGORY_HEADER)]);

    let body_limit = DefaultBodyLimit::max(state.config.max_request_bytes);

    let api_routes = Router::new()
        .route("/generate", post(handle_generate))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api", api_routes)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/generate`.
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(ApiError::Rejected)?;
    let turn_id = request.turn_id.unwrap_or_else(Uuid::new_v4);

    info!(
        %turn_id,
        prompt_len = request.prompt.len(),
        images = request.images.len(),
        history = request.history.len(),
        "Received generate request"
    );

    let images = ImagePayload::decode_all(&request.images, state.config.image_limits())?;
    let options = ResponseOptions::new(
        request.options.unwrap_or(state.config.defaults.sections),
        request.sliders.unwrap_or(state.config.defaults.sliders),
    );

    // Dropped with the response body, which happens when the client goes away.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let generation = state
        .gateway
        .generate(
            GenerationRequest {
                turn_id,
                prompt: request.prompt,
                options,
                images,
                history: request.history,
            },
            cancel,
        )
        .await
        .map_err(|e| {
            warn!(%turn_id, error = %e, "Generation failed before streaming");
            e
        })?;

    let category = generation.category;
    let mut upstream = generation.stream;
    let body = async_stream::stream! {
        let _guard = guard;
        let mut total = 0usize;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(mut chunk) => {
                    if chunk.as_bytes().contains(&FAILURE_MARKER) {
                        chunk.retain(|c| c != char::from(FAILURE_MARKER));
                    }
                    total += chunk.len();
                    yield Ok::<_, std::convert::Infallible>(Bytes::from(chunk));
                }
                Err(e) => {
                    warn!(%turn_id, %category, error = %e, "Generation failed mid-stream");
                    yield Ok(failure_frame(&e, category));
                    break;
                }
            }
        }
        info!(%turn_id, %category, total_len = total, "Generation finished");
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static(CATEGORY_HEADER), category.as_str()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Encodes a mid-stream failure as the trailing frame of an answer body.
fn failure_frame(err: &TutorError, category: Category) -> Bytes {
    let kind = match err {
        TutorError::GenerationError { kind, .. } => Some(*kind),
        _ => None,
    };
    let body = ErrorResponse {
        error: err.user_message(),
        category: Some(category),
        kind,
    };
    let mut frame = vec![FAILURE_MARKER];
    // Serializing a struct of strings and enums cannot fail.
    if let Ok(json) = serde_json::to_vec(&body) {
        frame.extend(json);
    }
    Bytes::from(frame)
}

/// Handler for `GET /api/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        provider: state.gateway.provider().to_string(),
        model: state.config.model.clone(),
    })
}
