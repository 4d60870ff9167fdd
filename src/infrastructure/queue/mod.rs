use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::modules::jobs::events::QueueItem;
use crate::pipeline::PipelineError;

pub mod job_queue;
pub mod rabbitmq;
pub mod retry;

/// Which delivery of an item this is, counted from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub max: u32,
}

impl Attempt {
    pub fn is_final(&self) -> bool {
        self.number >= self.max
    }
}

/// Producer side of the work queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, item: &QueueItem) -> Result<()>;
}

/// The single processing function deliveries are handed to.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, item: QueueItem, attempt: Attempt) -> Result<(), PipelineError>;

    /// Called instead of `handle` when the final attempt was lost without
    /// being settled. The item is not delivered again.
    async fn abandon(&self, item: QueueItem, err: &PipelineError);
}

const LOST_DELIVERY: &str = "Delivery was not settled before its lock expired.";

/// Runs one delivery and returns the outcome to settle it with.
///
/// A redelivered item is not run again under the same number: the delivery
/// that was lost (lock expiry or a dropped consumer) spent that attempt. It
/// settles as a transient failure, so it is rescheduled under the next
/// number or, after the final attempt, abandoned.
pub async fn dispatch(
    handler: &dyn DeliveryHandler,
    item: QueueItem,
    attempt: Attempt,
    redelivered: bool,
) -> Result<(), PipelineError> {
    if !redelivered {
        return handler.handle(item, attempt).await;
    }

    let err = PipelineError::TransientFailure(LOST_DELIVERY.to_string());
    warn!(job_id = %item.job_id, attempt = attempt.number, "Previous delivery was lost, counting its attempt");
    if attempt.is_final() {
        handler.abandon(item, &err).await;
    }
    Err(err)
}

/// Consumer side: pulls deliveries and settles them until `shutdown` fires.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<()>;
}
