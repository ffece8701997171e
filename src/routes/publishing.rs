//! Publishing queue endpoints (/publishing/jobs/*)

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::publishing::{self, JobFilter, NewPublishJob, PublishJob, PublishStatus};
use crate::domain::retry::{RetryPlan, partition_retriable};
use crate::routes::auth::AuthUser;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/publishing/jobs", get(list_jobs).post(create_job))
        .route("/publishing/jobs/retry", post(bulk_retry))
        .route("/publishing/jobs/retry/preview", post(preview_retry))
        .route("/publishing/jobs/{id}/retry", post(retry_job))
        .route("/publishing/jobs/{id}/cancel", post(cancel_job))
        .route("/publishing/jobs/{id}", delete(delete_job))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    platform: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct ListJobsResponse {
    jobs: Vec<PublishJob>,
    total: i64,
    has_more: bool,
}

/// Parse an optional `status` query value; unknown statuses are a client error
pub(crate) fn parse_status(raw: Option<&str>) -> Result<Option<PublishStatus>, StatusCode> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => PublishStatus::parse(s)
            .map(Some)
            .ok_or(StatusCode::BAD_REQUEST),
    }
}

/// GET /publishing/jobs - List the caller's jobs with optional filters
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    let filter = JobFilter {
        status: parse_status(query.status.as_deref())?,
        platform: query.platform.filter(|p| !p.is_empty()),
    };

    let total = publishing::count_jobs(&state.db, user_id, &filter)
        .await
        .log_500("Count jobs error")?;

    let jobs = publishing::list_jobs(&state.db, user_id, &filter, limit, offset)
        .await
        .log_500("List jobs error")?;

    let has_more = offset + (jobs.len() as i64) < total;

    Ok(Json(ListJobsResponse {
        jobs,
        total,
        has_more,
    }))
}

/// POST /publishing/jobs - Schedule content for publishing
async fn create_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<NewPublishJob>,
) -> Result<(StatusCode, Json<PublishJob>), StatusCode> {
    if req.title.trim().is_empty() || req.platform.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let job = publishing::create_job(&state.db, user_id, &req)
        .await
        .log_500("Create job error")?;

    tracing::info!(job_id = job.id, platform = %job.platform, "job scheduled");

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Deserialize)]
struct SelectionRequest {
    ids: Vec<i64>,
}

#[derive(Serialize)]
struct RetryPreviewResponse {
    retriable: Vec<i64>,
    conflicts: usize,
    can_retry: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct RetryResponse {
    retried: u64,
}

/// Deduplicated ids of a selection; an empty selection is a client error
fn selected_ids(req: &SelectionRequest) -> Result<Vec<i64>, StatusCode> {
    let mut ids = req.ids.clone();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(ids)
}

/// Partition the caller's jobs among `requested`. Ids that matched none of
/// the caller's jobs count as conflicts alongside non-retriable statuses.
fn plan_selection<'a>(requested: &[i64], found: &'a [PublishJob]) -> RetryPlan<'a, PublishJob> {
    let mut plan = partition_retriable(found);
    plan.conflicts += requested.len().saturating_sub(found.len());
    plan
}

/// Ids to re-enqueue, or 409 when nothing in the selection is retriable
fn retry_ids(plan: &RetryPlan<'_, PublishJob>) -> Result<Vec<i64>, StatusCode> {
    if !plan.can_retry() {
        return Err(StatusCode::CONFLICT);
    }
    Ok(plan.retriable.iter().map(|job| job.id).collect())
}

/// POST /publishing/jobs/retry/preview - Which of the selected jobs would be retried
async fn preview_retry(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<RetryPreviewResponse>, StatusCode> {
    let ids = selected_ids(&req)?;
    let selected = publishing::get_jobs_by_ids(&state.db, user_id, &ids)
        .await
        .log_500("Load selected jobs error")?;

    let plan = plan_selection(&ids, &selected);

    Ok(Json(RetryPreviewResponse {
        retriable: plan.retriable.iter().map(|job| job.id).collect(),
        conflicts: plan.conflicts,
        can_retry: plan.can_retry(),
    }))
}

/// Re-enqueue the retriable subset of `ids`
async fn retry_selection(
    state: &AppState,
    user_id: uuid::Uuid,
    ids: &[i64],
) -> Result<RetryResponse, StatusCode> {
    let selected = publishing::get_jobs_by_ids(&state.db, user_id, ids)
        .await
        .log_500("Load selected jobs error")?;

    let plan = plan_selection(ids, &selected);
    let retriable_ids = retry_ids(&plan)?;
    let retried = publishing::requeue_jobs(&state.db, user_id, &retriable_ids)
        .await
        .log_500("Requeue jobs error")?;

    tracing::info!(
        user_id = %user_id,
        selected = ids.len(),
        conflicts = plan.conflicts,
        retried,
        "jobs re-enqueued"
    );

    Ok(RetryResponse { retried })
}

/// POST /publishing/jobs/retry - Bulk retry of failed/cancelled jobs
async fn bulk_retry(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<RetryResponse>, StatusCode> {
    let ids = selected_ids(&req)?;
    retry_selection(&state, user_id, &ids).await.map(Json)
}

/// POST /publishing/jobs/{id}/retry - Retry a single job
async fn retry_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<i64>,
) -> Result<Json<RetryResponse>, StatusCode> {
    let found = publishing::get_jobs_by_ids(&state.db, user_id, &[job_id])
        .await
        .log_500("Load job error")?;
    if found.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    retry_selection(&state, user_id, &[job_id]).await.map(Json)
}

/// POST /publishing/jobs/{id}/cancel - Cancel a job that is still queued
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    if publishing::cancel_job(&state.db, user_id, job_id)
        .await
        .log_500("Cancel job error")?
    {
        return Ok(StatusCode::NO_CONTENT);
    }

    // Distinguish "not yours / gone" from "already past queued"
    let found = publishing::get_jobs_by_ids(&state.db, user_id, &[job_id])
        .await
        .log_500("Load job error")?;
    if found.is_empty() {
        Err(StatusCode::NOT_FOUND)
    } else {
        Err(StatusCode::CONFLICT)
    }
}

/// DELETE /publishing/jobs/{id}
async fn delete_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let deleted = publishing::delete_job(&state.db, user_id, job_id)
        .await
        .log_500("Delete job error")?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_accepts_known_and_empty_values() {
        assert_eq!(parse_status(None), Ok(None));
        assert_eq!(parse_status(Some("")), Ok(None));
        assert_eq!(parse_status(Some("failed")), Ok(Some(PublishStatus::Failed)));
        assert_eq!(parse_status(Some("draft")), Err(StatusCode::BAD_REQUEST));
    }

    fn job(id: i64, status: PublishStatus) -> PublishJob {
        let now = chrono::Utc::now();
        PublishJob {
            id,
            user_id: uuid::Uuid::new_v4(),
            title: format!("post {}", id),
            platform: "instagram".to_string(),
            status,
            scheduled_time: now,
            payload: sqlx::types::Json(serde_json::json!({})),
            error_logs: sqlx::types::Json(Vec::new()),
            created_at: now,
            updated_at: now,
        }
    }

    fn selection(ids: &[i64]) -> SelectionRequest {
        SelectionRequest { ids: ids.to_vec() }
    }

    #[test]
    fn empty_selection_is_bad_request() {
        assert_eq!(selected_ids(&selection(&[])), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn selection_ids_are_deduplicated() {
        assert_eq!(selected_ids(&selection(&[3, 1, 3, 2, 1])), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn nothing_retriable_is_conflict() {
        let found = [
            job(1, PublishStatus::Queued),
            job(2, PublishStatus::Processing),
            job(3, PublishStatus::Published),
        ];
        let plan = plan_selection(&[1, 2, 3], &found);
        assert_eq!(plan.conflicts, 3);
        assert_eq!(retry_ids(&plan), Err(StatusCode::CONFLICT));
    }

    #[test]
    fn mixed_selection_retries_failed_and_cancelled_only() {
        let found = [
            job(1, PublishStatus::Failed),
            job(2, PublishStatus::Queued),
            job(3, PublishStatus::Cancelled),
        ];
        let plan = plan_selection(&[1, 2, 3], &found);
        assert_eq!(plan.conflicts, 1);
        assert_eq!(retry_ids(&plan), Ok(vec![1, 3]));
    }

    #[test]
    fn unknown_ids_count_as_conflicts() {
        let found = [job(1, PublishStatus::Failed)];
        let plan = plan_selection(&[1, 7, 9], &found);
        assert_eq!(plan.conflicts, 2);
        assert_eq!(retry_ids(&plan), Ok(vec![1]));
    }

    #[test]
    fn selection_with_no_owned_jobs_is_conflict() {
        let plan = plan_selection(&[5, 6], &[]);
        assert_eq!(plan.conflicts, 2);
        assert_eq!(retry_ids(&plan), Err(StatusCode::CONFLICT));
    }

    #[test]
    fn retry_response_shape() {
        let body = serde_json::to_value(RetryResponse { retried: 2 }).unwrap();
        assert_eq!(body, serde_json::json!({ "retried": 2 }));
    }
}
