//! # digest-api
//!
//! HTTP transport for the memo digest pipeline.
//!
//! The binary in `main.rs` wires stores, the chat backend and the
//! auto-summary scheduler together; this library exposes the router so it
//! can be exercised in-process by tests.

pub mod handlers;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::error;
use utoipa::OpenApi;
use uuid::Uuid;

use digest_core::{Error, ErrorCode};
use digest_jobs::{AutoSummaryScheduler, SummaryService};

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SummaryService>,
    /// Used for on-demand sweeps; the background loop owns its own copy.
    pub scheduler: AutoSummaryScheduler,
    /// Cancelled on shutdown so in-flight provider calls stop waiting.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<SummaryService>, scheduler: AutoSummaryScheduler) -> Self {
        Self {
            service,
            scheduler,
            shutdown: CancellationToken::new(),
        }
    }
}

// =============================================================================
// CURRENT USER
// =============================================================================

/// Caller identity taken from the `X-User-Id` header.
///
/// A missing header yields an anonymous caller; a header that is not a UUID
/// is rejected with 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Option<Uuid>);

impl CurrentUser {
    /// The user id, or 401 for anonymous callers.
    pub fn require(self) -> Result<Uuid, ApiError> {
        self.0
            .ok_or_else(|| ApiError::Unauthorized("user not authenticated".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(CurrentUser(None));
        };
        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(|id| CurrentUser(Some(id)))
            .ok_or_else(|| ApiError::BadRequest("invalid X-User-Id header".to_string()))
    }
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Service(Error),
    Unauthorized(String),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Service(err)
    }
}

/// HTTP status for a service error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (code, message) = match self {
            ApiError::Service(err) => {
                let code = err.code();
                if code == ErrorCode::Internal {
                    error!(subsystem = "api", error = %err, "Request failed");
                }
                (code, err.to_string())
            }
            ApiError::Unauthorized(msg) => (ErrorCode::Unauthenticated, msg),
            ApiError::BadRequest(msg) => (ErrorCode::InvalidArgument, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status_for(code), body).into_response()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Memo Digest API",
        description = "AI summaries of recent memos, with an unattended per-user scheduler"
    ),
    paths(
        handlers::summaries::generate_summary,
        handlers::summaries::list_source_memos,
        handlers::ai::test_configuration,
        handlers::auto_summary::run_sweep,
    ),
    components(schemas(
        digest_core::SummaryRequest,
        digest_core::GeneratedSummary,
        digest_core::SourceMemoPage,
        digest_core::ConnectionTestResult,
        digest_core::Note,
        digest_core::NoteProperty,
        digest_core::Visibility,
        digest_core::RowStatus,
        digest_jobs::SweepReport,
    )),
    tags(
        (name = "Summaries", description = "Summary generation and provenance"),
        (name = "AI", description = "Provider configuration"),
        (name = "Auto-summary", description = "Scheduled summaries"),
    )
)]
pub struct ApiDoc;

/// Build the application router with its middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route("/api/v1/summaries", post(handlers::summaries::generate_summary))
        .route(
            "/api/v1/notes/:id/sources",
            get(handlers::summaries::list_source_memos),
        )
        .route("/api/v1/ai/test", post(handlers::ai::test_configuration))
        .route(
            "/api/v1/auto-summary/sweep",
            post(handlers::auto_summary::run_sweep),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// CORS from `ALLOWED_ORIGINS` (comma separated); any origin when unset.
fn cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
