//! AI provider configuration handlers.

use axum::{extract::State, Json};

use digest_core::ConnectionTestResult;

use crate::{ApiError, AppState, CurrentUser};

/// Test the configured AI provider with a short chat request.
///
/// Connection failures are reported in the body with 200; only a missing user
/// is an HTTP error.
#[utoipa::path(
    post,
    path = "/api/v1/ai/test",
    tag = "AI",
    responses(
        (status = 200, description = "Connection test outcome", body = ConnectionTestResult),
        (status = 401, description = "Missing user"),
    )
)]
pub async fn test_configuration(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ConnectionTestResult>, ApiError> {
    user.require()?;
    Ok(Json(state.service.test_configuration().await))
}
