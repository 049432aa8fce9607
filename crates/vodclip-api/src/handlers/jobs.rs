//! Job status polling.

use axum::extract::{Path, State};
use axum::Json;

use vodclip_models::{ClipJob, JobId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Current snapshot of a job; unknown and evicted ids are 404.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ClipJob>> {
    let job_id = JobId::parse(job_id)?;

    state
        .bus
        .snapshot(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}
