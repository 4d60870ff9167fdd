use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::model::{ContentBundle, Job, JobStatus};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateJobRequest {
    #[validate(url(message = "Invalid video URL"))]
    pub source_url: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateContentRequest {
    pub content: ContentBundle,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobQuery {
    /// Include the raw transcript in the response.
    #[serde(default)]
    pub include_transcript: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub source_url: String,
    pub video_id: String,
    pub status: JobStatus,
    pub content: Option<ContentBundle>,
    pub failed_reason: Option<String>,
    pub attempt_number: i32,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[schema(value_type = String, format = DateTime)]
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl JobResponse {
    pub fn from_job(job: Job, include_transcript: bool) -> Self {
        Self {
            id: job.id,
            source_url: job.source_url,
            video_id: job.video_id,
            status: job.status,
            content: job.content.map(|c| c.0),
            failed_reason: job.failed_reason,
            attempt_number: job.attempt_number,
            is_public: job.is_public,
            transcript: if include_transcript { job.transcript } else { None },
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self::from_job(job, false)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    pub is_public: bool,
    pub public_url: Option<String>,
}

impl PublishResponse {
    pub fn new(job_id: Uuid, is_public: bool) -> Self {
        Self {
            is_public,
            public_url: is_public.then(|| format!("/share/{}", job_id)),
        }
    }
}
