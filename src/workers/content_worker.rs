use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::queue::{Attempt, DeliveryHandler, QueueConsumer};
use crate::modules::jobs::events::QueueItem;
use crate::modules::jobs::model::Job;
use crate::modules::jobs::repository::JobStore;
use crate::modules::users::repository::UserStore;
use crate::pipeline::acquisition::TranscriptAcquirer;
use crate::pipeline::generator::ContentGenerator;
use crate::pipeline::PipelineError;

/// Runs one job end to end: acquire a transcript, generate the bundle,
/// store it.
pub struct ContentWorker {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    acquirer: TranscriptAcquirer,
    generator: ContentGenerator,
}

impl ContentWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserStore>,
        acquirer: TranscriptAcquirer,
        generator: ContentGenerator,
    ) -> Self {
        Self {
            jobs,
            users,
            acquirer,
            generator,
        }
    }

    async fn run(&self, job: &Job) -> Result<(), PipelineError> {
        let user = self
            .users
            .find_by_id(job.user_id)
            .await
            .map_err(PipelineError::transient)?
            .ok_or_else(|| PipelineError::InvalidInput("Job owner no longer exists.".to_string()))?;

        let acquired = self.acquirer.acquire(job, &user).await?;
        info!(job_id = %job.id, source = ?acquired.source, "Transcript ready");

        let bundle = self
            .generator
            .generate(&acquired.input, &user.plan().features)
            .await?;

        let stored = self
            .jobs
            .complete(job.id, &bundle)
            .await
            .map_err(PipelineError::transient)?;
        if !stored {
            warn!(job_id = %job.id, "Job left processing before completion, result dropped");
        }
        Ok(())
    }

    /// Loads the job, claims it and runs it. `Ok` also covers deliveries
    /// that had nothing to do.
    async fn process(&self, item: &QueueItem, attempt: Attempt) -> Result<(), PipelineError> {
        let Some(existing) = self
            .jobs
            .find_by_id(item.job_id)
            .await
            .map_err(PipelineError::transient)?
        else {
            warn!(job_id = %item.job_id, "Job no longer exists, dropping delivery");
            return Ok(());
        };

        // Duplicate deliveries of settled jobs are no-ops.
        if !existing.status.accepts_delivery() {
            info!(job_id = %existing.id, status = %existing.status, "Job already settled, skipping");
            return Ok(());
        }

        let Some(job) = self
            .jobs
            .mark_processing(existing.id)
            .await
            .map_err(PipelineError::transient)?
        else {
            return Ok(());
        };

        info!(job_id = %job.id, attempt = attempt.number, "🚀 Processing job");
        self.run(&job).await?;
        info!(job_id = %job.id, "✅ Job completed");
        Ok(())
    }

    /// Writes `failed` with the reason, retrying the write a few times. A
    /// job already settled elsewhere is left alone.
    async fn persist_failure(&self, job_id: Uuid, err: &PipelineError) {
        let reason = err.failed_reason();
        for write in 1..=FAIL_WRITE_ATTEMPTS {
            match self.jobs.fail(job_id, &reason).await {
                Ok(true) => return,
                Ok(false) => {
                    warn!(%job_id, "Job was not queued or processing, failure not recorded");
                    return;
                }
                Err(e) if write < FAIL_WRITE_ATTEMPTS => {
                    warn!(%job_id, write, "Failed to persist failure, retrying: {:#}", e);
                    tokio::time::sleep(FAIL_WRITE_BACKOFF * write).await;
                }
                Err(e) => error!(%job_id, "Failed to persist failure: {:#}", e),
            }
        }
    }
}

const FAIL_WRITE_ATTEMPTS: u32 = 3;
const FAIL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

#[async_trait]
impl DeliveryHandler for ContentWorker {
    async fn handle(&self, item: QueueItem, attempt: Attempt) -> Result<(), PipelineError> {
        let Err(err) = self.process(&item, attempt).await else {
            return Ok(());
        };

        if !err.is_retryable() || attempt.is_final() {
            error!(job_id = %item.job_id, attempt = attempt.number, "❌ Job failed: {}", err);
            self.persist_failure(item.job_id, &err).await;
        } else {
            warn!(job_id = %item.job_id, attempt = attempt.number, "Attempt failed, will retry: {}", err);
        }
        Err(err)
    }

    async fn abandon(&self, item: QueueItem, err: &PipelineError) {
        error!(job_id = %item.job_id, "❌ Job abandoned: {}", err);
        self.persist_failure(item.job_id, err).await;
    }
}

/// Owns the consumer task. `start` spawns it, `stop` cancels intake and
/// waits for in-flight jobs to settle.
pub struct WorkerService {
    consumer: Arc<dyn QueueConsumer>,
    handler: Arc<dyn DeliveryHandler>,
    concurrency: usize,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl WorkerService {
    pub fn new(consumer: Arc<dyn QueueConsumer>, handler: Arc<dyn DeliveryHandler>, concurrency: usize) -> Self {
        Self {
            consumer,
            handler,
            concurrency: concurrency.max(1),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        info!(concurrency = self.concurrency, "🎬 Starting content worker");
        let consumer = self.consumer.clone();
        let handler = self.handler.clone();
        let concurrency = self.concurrency;
        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(async move {
            consumer.run(handler, concurrency, shutdown).await
        }));
    }

    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        let Some(task) = self.task.take() else {
            return;
        };

        match task.await {
            Ok(Ok(())) => info!("Content worker stopped"),
            Ok(Err(e)) => error!("Content worker exited with error: {:#}", e),
            Err(e) => error!("Content worker task panicked: {}", e),
        }
    }
}
