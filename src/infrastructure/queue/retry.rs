use std::time::Duration;

use crate::config::settings::QueueSettings;
use crate::pipeline::PipelineError;

/// Exponential backoff over a fixed number of deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// What to do with a delivery once the handler returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Done; remove the item.
    Ack,
    /// Deliver again after `delay` as attempt `next_attempt`.
    Retry { next_attempt: u32, delay: Duration },
    /// Park in the failed holding queue. Only a manual retry brings the job back.
    DeadLetter { reason: String },
}

impl RetryPolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_ms),
        }
    }

    /// Wait before delivery `attempt + 1`: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn settle(&self, attempt: u32, outcome: &Result<(), PipelineError>) -> Settlement {
        match outcome {
            Ok(()) => Settlement::Ack,
            Err(err) if err.is_retryable() && attempt < self.max_attempts => Settlement::Retry {
                next_attempt: attempt + 1,
                delay: self.backoff(attempt),
            },
            Err(err) => Settlement::DeadLetter {
                reason: err.failed_reason(),
            },
        }
    }
}
