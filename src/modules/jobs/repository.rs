use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::model::{ContentBundle, Job, NewJob};

/// Persistence of the job record. Every status change is a conditional
/// update, so a write that would break the state machine is a no-op
/// (`false` / `None`) rather than an overwrite.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a queued job only while the owner's standard usage plus the
    /// jobs still waiting on a transcript stays below `limit`. The check and
    /// the insert happen under the owner's row lock, so concurrent
    /// submissions cannot overshoot. `None` means no room.
    async fn insert_admitted(&self, job: NewJob, limit: i32) -> Result<Option<Job>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>>;

    /// Owner's jobs, newest first, without transcripts.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Job>>;

    /// queued|processing -> processing.
    async fn mark_processing(&self, id: Uuid) -> Result<Option<Job>>;

    async fn save_transcript(&self, id: Uuid, transcript: &str) -> Result<()>;

    /// processing -> completed.
    async fn complete(&self, id: Uuid, bundle: &ContentBundle) -> Result<bool>;

    /// queued|processing -> failed.
    async fn fail(&self, id: Uuid, reason: &str) -> Result<bool>;

    /// failed -> queued, bumping the attempt number and clearing the reason.
    async fn requeue_failed(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>>;

    async fn toggle_public(&self, id: Uuid, user_id: Uuid) -> Result<Option<bool>>;

    /// Overwrites the bundle of a completed job.
    async fn replace_content(&self, id: Uuid, user_id: Uuid, bundle: &ContentBundle) -> Result<Option<Job>>;
}

const JOB_COLUMNS: &str = "id, user_id, source_url, video_id, status, transcript, content, \
                           failed_reason, attempt_number, is_public, created_at, updated_at";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert_admitted(&self, job: NewJob, limit: i32) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let used: Option<i32> =
            sqlx::query_scalar("SELECT monthly_quota_used FROM users WHERE id = $1 FOR UPDATE")
                .bind(job.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(used) = used else {
            return Ok(None);
        };

        // Jobs without a transcript have not been charged yet.
        let pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE user_id = $1 AND status IN ('queued', 'processing') AND transcript IS NULL
            "#,
        )
        .bind(job.user_id)
        .fetch_one(&mut *tx)
        .await?;

        if i64::from(used) + pending >= i64::from(limit) {
            tx.rollback().await?;
            return Ok(None);
        }

        let sql = format!(
            "INSERT INTO jobs (user_id, source_url, video_id) VALUES ($1, $2, $3) RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(job.user_id)
            .bind(job.source_url)
            .bind(job.video_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND user_id = $2");
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, user_id, source_url, video_id, status, NULL::text AS transcript, content,
                   failed_reason, attempt_number, is_public, created_at, updated_at
            FROM jobs
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Option<Job>> {
        let sql = format!(
            "UPDATE jobs SET status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND status IN ('queued', 'processing') \
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn save_transcript(&self, id: Uuid, transcript: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET transcript = $1, updated_at = NOW() WHERE id = $2")
            .bind(transcript)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, bundle: &ContentBundle) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', content = $1, failed_reason = NULL, updated_at = NOW()
            WHERE id = $2 AND status = 'processing'
            "#,
        )
        .bind(Json(bundle))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', failed_reason = $1, updated_at = NOW()
            WHERE id = $2 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_failed(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        let sql = format!(
            "UPDATE jobs \
             SET status = 'queued', failed_reason = NULL, attempt_number = attempt_number + 1, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND status = 'failed' \
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn toggle_public(&self, id: Uuid, user_id: Uuid) -> Result<Option<bool>> {
        let is_public: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE jobs SET is_public = NOT is_public, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING is_public
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(is_public)
    }

    async fn replace_content(&self, id: Uuid, user_id: Uuid, bundle: &ContentBundle) -> Result<Option<Job>> {
        let sql = format!(
            "UPDATE jobs SET content = $1, updated_at = NOW() \
             WHERE id = $2 AND user_id = $3 AND status = 'completed' \
             RETURNING {JOB_COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(Json(bundle))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }
}
