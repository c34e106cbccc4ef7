//! Summary generation and provenance handlers.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use digest_core::{GeneratedSummary, SourceMemoPage, SummaryRequest};

use crate::{ApiError, AppState, CurrentUser};

/// Query parameters for listing the sources of a summary.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SourceMemosQuery {
    /// Page size (default 50, max 100).
    pub page_size: Option<i64>,
    /// Opaque token from a previous page.
    pub page_token: Option<String>,
}

/// Generate a summary note from the caller's recent memos.
///
/// # Returns
/// - 201 Created with the new note and run statistics
/// - 400 for a malformed request, 401 without a user
/// - 404 when no memos fall in the window
/// - 412 when AI is not configured, 429 when over quota
#[utoipa::path(
    post,
    path = "/api/v1/summaries",
    tag = "Summaries",
    request_body = SummaryRequest,
    responses(
        (status = 201, description = "Summary created", body = GeneratedSummary),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing user"),
        (status = 404, description = "No memos in range"),
        (status = 412, description = "AI not configured"),
        (status = 429, description = "Hourly quota exhausted"),
    )
)]
pub async fn generate_summary(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GeneratedSummary>), ApiError> {
    let user_id = user.require()?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let cancel = state.shutdown.child_token();
    let generated = state
        .service
        .generate_summary(user_id, &request, &cancel)
        .await?;

    info!(
        subsystem = "api",
        op = "generate_summary",
        user_id = %user_id,
        note_id = %generated.note.id,
        "Summary created"
    );
    Ok((StatusCode::CREATED, Json(generated)))
}

/// List the source memos a summary was generated from.
///
/// Anonymous callers may read sources of public summaries only.
#[utoipa::path(
    get,
    path = "/api/v1/notes/{id}/sources",
    tag = "Summaries",
    params(
        ("id" = Uuid, Path, description = "Summary note id"),
        SourceMemosQuery,
    ),
    responses(
        (status = 200, description = "One page of source memos", body = SourceMemoPage),
        (status = 400, description = "Invalid page token"),
        (status = 403, description = "Summary not visible to caller"),
        (status = 404, description = "Summary not found"),
    )
)]
pub async fn list_source_memos(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: CurrentUser,
    query: Result<Query<SourceMemosQuery>, QueryRejection>,
) -> Result<Json<SourceMemoPage>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = state
        .service
        .get_source_memos(user.0, id, query.page_size, query.page_token.as_deref())
        .await?;
    Ok(Json(page))
}
