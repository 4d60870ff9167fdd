use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use super::dto::{JobResponse, PublishResponse};
use super::error::JobError;
use super::events::QueueItem;
use super::model::{ContentBundle, Job, JobStatus, NewJob};
use super::repository::JobStore;
use super::video_url::extract_video_id;
use crate::infrastructure::queue::JobQueue;
use crate::modules::users::model::QuotaKind;
use crate::modules::users::repository::UserStore;

/// Owner-facing job operations. Processing itself happens in the worker.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    queue: Arc<dyn JobQueue>,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, users: Arc<dyn UserStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { jobs, users, queue }
    }

    pub async fn create_job(&self, user_id: Uuid, source_url: &str) -> Result<JobResponse, JobError> {
        let video_id = extract_video_id(source_url)
            .ok_or_else(|| JobError::InvalidInput("Invalid YouTube URL".to_string()))?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(JobError::NotFound("User"))?;

        // Admission reserves nothing; the worker charges once the transcript
        // path is known. Queued jobs still count against the plan.
        let limit = QuotaKind::Standard.limit(user.plan());
        let job = self
            .jobs
            .insert_admitted(
                NewJob {
                    user_id,
                    source_url: source_url.to_string(),
                    video_id,
                },
                limit,
            )
            .await?
            .ok_or(JobError::QuotaExceeded {
                plan: user.plan().name,
            })?;

        self.enqueue(&job).await?;
        info!(job_id = %job.id, %user_id, "Job created");
        Ok(job.into())
    }

    pub async fn list_jobs(&self, user_id: Uuid) -> Result<Vec<JobResponse>, JobError> {
        let jobs = self.jobs.list_for_user(user_id).await?;
        Ok(jobs.into_iter().map(JobResponse::from).collect())
    }

    pub async fn get_job(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        include_transcript: bool,
    ) -> Result<JobResponse, JobError> {
        let job = self.owned(job_id, user_id).await?;
        Ok(JobResponse::from_job(job, include_transcript))
    }

    /// Anyone may read a job its owner published. Content shows once completed.
    pub async fn get_public_job(&self, job_id: Uuid) -> Result<JobResponse, JobError> {
        let mut job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .filter(|job| job.is_public)
            .ok_or(JobError::NotFound("Job"))?;

        if job.status != JobStatus::Completed {
            job.content = None;
        }
        Ok(JobResponse::from_job(job, false))
    }

    pub async fn retry_job(&self, job_id: Uuid, user_id: Uuid) -> Result<JobResponse, JobError> {
        let job = self.owned(job_id, user_id).await?;
        if !job.status.can_transition_to(JobStatus::Queued) {
            return Err(JobError::InvalidState("You can only retry failed jobs"));
        }

        // The conditional update loses to a concurrent retry of the same job.
        let job = self
            .jobs
            .requeue_failed(job_id, user_id)
            .await?
            .ok_or(JobError::InvalidState("You can only retry failed jobs"))?;

        self.enqueue(&job).await?;
        info!(job_id = %job.id, attempt = job.attempt_number, "Job re-queued");
        Ok(job.into())
    }

    pub async fn toggle_public(&self, job_id: Uuid, user_id: Uuid) -> Result<PublishResponse, JobError> {
        let is_public = self
            .jobs
            .toggle_public(job_id, user_id)
            .await?
            .ok_or(JobError::NotFound("Job"))?;

        Ok(PublishResponse::new(job_id, is_public))
    }

    pub async fn update_content(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        content: ContentBundle,
    ) -> Result<JobResponse, JobError> {
        let job = self.owned(job_id, user_id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::InvalidState("Only completed jobs can be edited"));
        }

        let job = self
            .jobs
            .replace_content(job_id, user_id, &content)
            .await?
            .ok_or(JobError::NotFound("Job"))?;

        Ok(job.into())
    }

    async fn owned(&self, job_id: Uuid, user_id: Uuid) -> Result<Job, JobError> {
        self.jobs
            .find_owned(job_id, user_id)
            .await?
            .ok_or(JobError::NotFound("Job"))
    }

    async fn enqueue(&self, job: &Job) -> Result<(), JobError> {
        let item = QueueItem {
            job_id: job.id,
            source_url: job.source_url.clone(),
        };
        self.queue.enqueue(&item).await.map_err(|e| {
            error!(job_id = %job.id, "Failed to enqueue job: {:#}", e);
            JobError::Internal(e)
        })
    }
}
