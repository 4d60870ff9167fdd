use super::dto::{CreateJobRequest, JobQuery, JobResponse, PublishResponse, UpdateContentRequest};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::middleware::auth::TokenClaims;
use crate::state::AppState;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

/// Submit a video for processing
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job queued", body = ApiResponse<JobResponse>),
        (status = 400, description = "Invalid video URL"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Monthly quota exceeded")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn create_job(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Json(payload): Json<CreateJobRequest>,
) -> impl IntoResponse {
    if let Err(e) = payload.validate() {
        return ApiError::from(e).into_response();
    }

    match state.jobs.create_job(claims.sub, &payload.source_url).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job queued successfully"),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// List the caller's jobs, newest first
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    responses(
        (status = 200, description = "List of jobs", body = ApiResponse<Vec<JobResponse>>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> impl IntoResponse {
    match state.jobs.list_jobs(claims.sub).await {
        Ok(jobs) => ApiSuccess(
            ApiResponse::success(jobs, "Jobs retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Get one of the caller's jobs
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        JobQuery
    ),
    responses(
        (status = 200, description = "Job details", body = ApiResponse<JobResponse>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn get_job(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
    Query(query): Query<JobQuery>,
) -> impl IntoResponse {
    match state.jobs.get_job(id, claims.sub, query.include_transcript).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Overwrite the generated content of a completed job
#[utoipa::path(
    patch,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    request_body = UpdateContentRequest,
    responses(
        (status = 200, description = "Content updated", body = ApiResponse<JobResponse>),
        (status = 400, description = "Job is not completed"),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn update_job_content(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateContentRequest>,
) -> impl IntoResponse {
    match state.jobs.update_content(id, claims.sub, payload.content).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Content updated successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Re-queue a failed job
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/retry",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job re-queued", body = ApiResponse<JobResponse>),
        (status = 400, description = "Job is not failed"),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn retry_job(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.jobs.retry_job(id, claims.sub).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job has been re-queued"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Toggle public sharing of a job
#[utoipa::path(
    patch,
    path = "/api/v1/jobs/{id}/publish",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Sharing toggled", body = ApiResponse<PublishResponse>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn toggle_public(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.jobs.toggle_public(id, claims.sub).await {
        Ok(publish) => ApiSuccess(
            ApiResponse::success(publish, "Sharing updated"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Read a published job without authentication
#[utoipa::path(
    get,
    path = "/api/v1/public/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Published job", body = ApiResponse<JobResponse>),
        (status = 404, description = "Private or missing job")
    ),
    tag = "Jobs"
)]
pub async fn get_public_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.jobs.get_public_job(id).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
