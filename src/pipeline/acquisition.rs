use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::upstream::{MediaService, RemoteFileState, VideoMetadata, VideoSource};
use super::{MediaRef, PipelineError, TranscriptInput};
use crate::config::settings::WorkerSettings;
use crate::modules::jobs::model::Job;
use crate::modules::jobs::repository::JobStore;
use crate::modules::users::model::{QuotaKind, User};
use crate::modules::users::quota::QuotaGate;

const AUDIO_MIME_TYPE: &str = "audio/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    /// Already on the job from an earlier delivery.
    Saved,
    Scrape,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub source: TranscriptSource,
    pub input: TranscriptInput,
}

/// Gets a transcript for a job: cheap caption scrape first, paid audio
/// transcription only when the scrape fails.
///
/// Charging policy:
/// - a successful scrape costs one standard unit,
/// - a failed scrape costs nothing,
/// - the fallback costs one fallback unit, charged before the download.
pub struct TranscriptAcquirer {
    video: Arc<dyn VideoSource>,
    media: Arc<dyn MediaService>,
    jobs: Arc<dyn JobStore>,
    quota: QuotaGate,
    temp_root: PathBuf,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl TranscriptAcquirer {
    pub fn new(
        video: Arc<dyn VideoSource>,
        media: Arc<dyn MediaService>,
        jobs: Arc<dyn JobStore>,
        quota: QuotaGate,
        temp_root: PathBuf,
        settings: &WorkerSettings,
    ) -> Self {
        Self {
            video,
            media,
            jobs,
            quota,
            temp_root,
            poll_interval: settings.poll_interval(),
            poll_max_attempts: settings.poll_max_attempts,
        }
    }

    pub async fn acquire(&self, job: &Job, user: &User) -> Result<Acquired, PipelineError> {
        // A redelivered job resumes at generation instead of paying twice.
        if let Some(transcript) = job.transcript.as_ref().filter(|t| !t.trim().is_empty()) {
            info!(job_id = %job.id, "Resuming from saved transcript");
            return Ok(Acquired {
                source: TranscriptSource::Saved,
                input: TranscriptInput::Text(transcript.clone()),
            });
        }

        let plan = user.plan();
        let video = self
            .video
            .metadata(&job.source_url)
            .await
            .map_err(|e| PipelineError::transient(format!("Could not read video metadata: {:#}", e)))?;

        let minutes = video.duration_minutes().ok_or_else(|| {
            PipelineError::InvalidInput("Could not determine the video duration.".to_string())
        })?;
        if minutes > plan.max_duration {
            return Err(PipelineError::InvalidInput(format!(
                "Video is {} mins. Limit is {} mins.",
                minutes, plan.max_duration
            )));
        }

        info!(job_id = %job.id, "Trying caption scrape");
        match self.video.fetch_transcript(&video).await {
            Ok(text) if !text.trim().is_empty() => self.keep_scraped(job, user, text).await,
            Ok(_) => {
                warn!(job_id = %job.id, "Caption track was empty, switching to audio fallback");
                self.fallback(job, user, &video).await
            }
            Err(e) => {
                warn!(job_id = %job.id, "Caption scrape failed ({:#}), switching to audio fallback", e);
                self.fallback(job, user, &video).await
            }
        }
    }

    async fn keep_scraped(&self, job: &Job, user: &User, text: String) -> Result<Acquired, PipelineError> {
        let grant = self
            .quota
            .try_consume(user.id, QuotaKind::Standard, 1)
            .await
            .map_err(PipelineError::transient)?;
        if !grant.granted {
            return Err(PipelineError::QuotaExceeded(QuotaKind::Standard));
        }

        // Persist before generation so a redelivery can skip this step.
        self.jobs
            .save_transcript(job.id, &text)
            .await
            .map_err(PipelineError::transient)?;

        info!(job_id = %job.id, chars = text.len(), "✅ Caption scrape succeeded");
        Ok(Acquired {
            source: TranscriptSource::Scrape,
            input: TranscriptInput::Text(text),
        })
    }

    async fn fallback(&self, job: &Job, user: &User, video: &VideoMetadata) -> Result<Acquired, PipelineError> {
        let grant = self
            .quota
            .try_consume(user.id, QuotaKind::Fallback, 1)
            .await
            .map_err(PipelineError::transient)?;
        if !grant.granted {
            return Err(PipelineError::QuotaExceeded(QuotaKind::Fallback));
        }

        // Removed when dropped, whichever way this function returns.
        let workdir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job.id))
            .tempdir_in(&self.temp_root)
            .map_err(|e| PipelineError::AcquisitionFailure(format!("Could not create temp dir: {}", e)))?;

        info!(job_id = %job.id, "Downloading audio for fallback transcription");
        let audio_path = self
            .video
            .download_audio(&job.source_url, video, workdir.path())
            .await
            .map_err(|e| PipelineError::AcquisitionFailure(format!("Audio download failed: {:#}", e)))?;

        let media = self.upload_and_wait(job, &audio_path).await?;

        info!(job_id = %job.id, uri = %media.uri, "✅ Audio fallback succeeded");
        Ok(Acquired {
            source: TranscriptSource::Fallback,
            input: TranscriptInput::Media(media),
        })
    }

    async fn upload_and_wait(&self, job: &Job, audio_path: &std::path::Path) -> Result<MediaRef, PipelineError> {
        let mut file = self
            .media
            .upload(audio_path, AUDIO_MIME_TYPE, &format!("Job-{}", job.id))
            .await
            .map_err(|e| PipelineError::upstream("Audio upload failed", e, PipelineError::AcquisitionFailure))?;

        let mut polls = 0;
        while file.state == RemoteFileState::Processing {
            if polls >= self.poll_max_attempts {
                return Err(PipelineError::AcquisitionFailure(
                    "Timed out waiting for the uploaded audio to be processed.".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            file = self
                .media
                .file_status(&file.name)
                .await
                .map_err(|e| {
                    PipelineError::upstream("Audio status check failed", e, PipelineError::AcquisitionFailure)
                })?;
        }

        if file.state == RemoteFileState::Failed {
            return Err(PipelineError::AcquisitionFailure(
                "The transcription service failed to process the audio.".to_string(),
            ));
        }

        Ok(file.media_ref())
    }
}
