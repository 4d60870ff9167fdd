use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Allowed moves of the job record. A failed job only goes back to
    /// `queued` through an owner-triggered retry. A queued job may fail
    /// directly when its final delivery errors before processing starts.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Queued)
        )
    }

    /// Whether a queue delivery may (re)enter processing. `processing` is
    /// accepted so that a delivery redelivered after lock expiry can resume.
    pub fn accepts_delivery(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Generated written content for one video.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct ContentBundle {
    pub article: String,
    pub social_post_short: String,
    pub social_thread: Vec<String>,
    pub newsletter_body: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_url: String,
    pub video_id: String,
    pub status: JobStatus,
    pub transcript: Option<String>,
    pub content: Option<Json<ContentBundle>>,
    pub failed_reason: Option<String>,
    pub attempt_number: i32,
    pub is_public: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub source_url: String,
    pub video_id: String,
}
