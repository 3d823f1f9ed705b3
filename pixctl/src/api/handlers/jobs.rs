use crate::{
    api::models::jobs::{BatchResetResponse, JobStatusResponse},
    auth::permissions::{operation, resource, RequiresPermission},
    errors::Result,
    AppState,
};
use axum::{extract::State, response::Json};
use tracing::info;

// POST /admin/credits/reset - Run the daily reset sweep now
#[utoipa::path(
    post,
    path = "/admin/credits/reset",
    tag = "admin",
    summary = "Run credit reset",
    description = "Reset every account whose daily window has elapsed, the same sweep the scheduler runs. Fails if a sweep is already in progress.",
    responses(
        (status = 200, description = "Batch summary", body = BatchResetResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - billing or platform manager required"),
        (status = 409, description = "A reset sweep is already running"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn trigger_credit_reset(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Jobs, operation::UpdateAll>,
) -> Result<Json<BatchResetResponse>> {
    info!("Credit reset sweep requested by {}", current_user.email);
    let summary = state.scheduler.run_manual().await?;
    Ok(Json(BatchResetResponse::from(summary)))
}

// GET /admin/jobs - Scheduler status
#[utoipa::path(
    get,
    path = "/admin/jobs",
    tag = "admin",
    summary = "Job status",
    description = "Whether the reset sweep is running or scheduled, its next execution and the last run's summary.",
    responses(
        (status = 200, description = "Scheduler status", body = JobStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - billing or platform manager required"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn job_status(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Jobs, operation::ReadAll>,
) -> Result<Json<JobStatusResponse>> {
    Ok(Json(JobStatusResponse::from(state.scheduler.status().await)))
}
