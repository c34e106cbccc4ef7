//! Auto-summary scheduler handlers.

use axum::{extract::State, Json};
use tracing::info;

use digest_jobs::SweepReport;

use crate::{ApiError, AppState, CurrentUser};

/// Run one auto-summary sweep now and return its report.
#[utoipa::path(
    post,
    path = "/api/v1/auto-summary/sweep",
    tag = "Auto-summary",
    responses(
        (status = 200, description = "Sweep report", body = SweepReport),
        (status = 401, description = "Missing user"),
    )
)]
pub async fn run_sweep(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<SweepReport>, ApiError> {
    let requested_by = user.require()?;
    let report = state
        .scheduler
        .run_once(&state.shutdown.child_token())
        .await;
    info!(
        subsystem = "api",
        op = "run_sweep",
        user_id = %requested_by,
        considered = report.considered,
        succeeded = report.succeeded,
        failed = report.failed,
        "On-demand sweep finished"
    );
    Ok(Json(report))
}
