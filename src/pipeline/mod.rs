//! Transcript acquisition and content generation: the two steps a worker
//! runs for every job, in that order.

use thiserror::Error;

use crate::modules::users::model::QuotaKind;

pub mod acquisition;
pub mod generator;
pub mod upstream;

/// Opaque handle to media already uploaded to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// What the generator consumes: scraped text, or a reference to uploaded
/// audio it transcribes itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptInput {
    Text(String),
    Media(MediaRef),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{}", quota_message(.0))]
    QuotaExceeded(QuotaKind),
    #[error("Transcript acquisition failed: {0}")]
    AcquisitionFailure(String),
    #[error("Content generation failed: {0}")]
    GenerationFailure(String),
    #[error("Temporary failure: {0}")]
    TransientFailure(String),
}

fn quota_message(kind: &QuotaKind) -> &'static str {
    match kind {
        QuotaKind::Standard => "Monthly quota exceeded.",
        QuotaKind::Fallback => "Transcript unavailable and audio quota exceeded.",
    }
}

impl PipelineError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        PipelineError::TransientFailure(err.to_string())
    }

    /// Classifies a failed upstream call. A request that timed out is
    /// transient; anything else becomes `other`.
    pub fn upstream(context: &str, err: anyhow::Error, other: fn(String) -> PipelineError) -> Self {
        let message = format!("{}: {:#}", context, err);
        if timed_out(&err) {
            PipelineError::TransientFailure(message)
        } else {
            other(message)
        }
    }

    /// Whether the queue may redeliver the item. Bad input and spent quota
    /// will not improve on their own, and a failed fallback already cost a
    /// paid unit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFailure(_) | PipelineError::GenerationFailure(_)
        )
    }

    /// Text persisted as the job's `failed_reason`.
    pub fn failed_reason(&self) -> String {
        self.to_string()
    }
}

fn timed_out(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some_and(reqwest::Error::is_timeout))
}
