use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::BasicProperties;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::rabbitmq::RabbitMqService;
use super::retry::{RetryPolicy, Settlement};
use super::{dispatch, Attempt, DeliveryHandler, JobQueue, QueueConsumer};
use crate::config::settings::QueueSettings;
use crate::modules::jobs::events::QueueItem;

const ATTEMPT_HEADER: &str = "x-attempt";
const REASON_HEADER: &str = "x-failed-reason";
const CONSUMER_TAG: &str = "content_worker";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Durable work queue on RabbitMQ.
///
/// Topology, for a base name `q`:
/// - `q`: work items. `x-consumer-timeout` is the lock window: a consumer
///   that holds a delivery unacked for longer loses its channel and the
///   broker redelivers the item.
/// - `q.retry.N`: holding queue for the wait after failed attempt `N`. Its
///   message TTL is the backoff, after which the item dead-letters back into `q`.
/// - `q.failed`: items whose retries are exhausted or that failed terminally.
#[derive(Clone)]
pub struct RabbitJobQueue {
    mq: RabbitMqService,
    settings: QueueSettings,
    policy: RetryPolicy,
}

impl RabbitJobQueue {
    pub async fn new(mq: RabbitMqService, settings: QueueSettings) -> Result<Self> {
        let policy = RetryPolicy::from_settings(&settings);
        let queue = Self { mq, settings, policy };
        queue.declare_topology().await?;
        Ok(queue)
    }

    async fn declare_topology(&self) -> Result<()> {
        let name = &self.settings.name;

        let mut main_args = FieldTable::default();
        main_args.insert(
            "x-consumer-timeout".into(),
            AMQPValue::LongLongInt(millis(Duration::from_secs(self.settings.lock_timeout_secs))),
        );
        self.mq.declare_queue(name, main_args).await?;

        for attempt in 1..self.policy.max_attempts {
            let mut retry_args = FieldTable::default();
            retry_args.insert(
                "x-message-ttl".into(),
                AMQPValue::LongLongInt(millis(self.policy.backoff(attempt))),
            );
            retry_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(LongString::from("")),
            );
            retry_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(LongString::from(name.as_str())),
            );
            self.mq
                .declare_queue(&retry_queue_name(name, attempt), retry_args)
                .await?;
        }

        self.mq
            .declare_queue(&failed_queue_name(name), FieldTable::default())
            .await?;

        info!(queue = %name, max_attempts = self.policy.max_attempts, "Queue topology declared");
        Ok(())
    }

    async fn publish_item(&self, queue: &str, payload: &[u8], attempt: u32, reason: Option<&str>) -> Result<()> {
        self.mq
            .publish(queue, payload, attempt_headers(attempt, reason))
            .await
    }

    async fn consume_until_closed(
        &self,
        handler: &Arc<dyn DeliveryHandler>,
        slots: &Arc<Semaphore>,
        concurrency: usize,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let channel = self.mq.get_channel().await;
        let channel_guard = channel.lock().await;

        // Never hold more unacked deliveries than there are slots to run them.
        channel_guard
            .basic_qos(concurrency.min(u16::MAX as usize) as u16, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch: {}", e))?;

        let mut consumer = channel_guard
            .basic_consume(
                &self.settings.name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        // The consumer stream is independent of the channel lock.
        drop(channel_guard);

        info!("🎬 Content worker listening on '{}'", self.settings.name);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(anyhow!("Consumer error: {}", e)),
                None => return Err(anyhow!("Consumer stream closed")),
            };

            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("Worker slots closed: {}", e))?;

            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                queue.process_delivery(handler, delivery).await;
                drop(permit);
            });
        }
    }

    async fn process_delivery(&self, handler: Arc<dyn DeliveryHandler>, delivery: Delivery) {
        let attempt = Attempt {
            number: attempt_from(&delivery.properties),
            max: self.policy.max_attempts,
        };

        let item = match serde_json::from_slice::<QueueItem>(&delivery.data) {
            Ok(item) => item,
            Err(e) => {
                error!("❌ Failed to parse queue item: {}", e);
                let settlement = Settlement::DeadLetter {
                    reason: format!("Unreadable payload: {}", e),
                };
                self.finish(&delivery, settlement, attempt.number).await;
                return;
            }
        };

        info!(
            job_id = %item.job_id,
            attempt = attempt.number,
            redelivered = delivery.redelivered,
            "📦 Received content job"
        );

        let outcome = dispatch(handler.as_ref(), item, attempt, delivery.redelivered).await;
        let settlement = self.policy.settle(attempt.number, &outcome);
        self.finish(&delivery, settlement, attempt.number).await;
    }

    async fn finish(&self, delivery: &Delivery, settlement: Settlement, attempt: u32) {
        let forwarded = match &settlement {
            Settlement::Ack => Ok(()),
            Settlement::Retry { next_attempt, delay } => {
                info!(attempt, next_attempt, ?delay, "Scheduling retry");
                self.publish_item(
                    &retry_queue_name(&self.settings.name, attempt),
                    &delivery.data,
                    *next_attempt,
                    None,
                )
                .await
            }
            Settlement::DeadLetter { reason } => {
                warn!(attempt, %reason, "Parking item in failed queue");
                self.publish_item(
                    &failed_queue_name(&self.settings.name),
                    &delivery.data,
                    attempt,
                    Some(reason),
                )
                .await
            }
        };

        match forwarded {
            Ok(()) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!("Failed to ack message: {}", e);
                }
            }
            Err(e) => {
                // Leave the item with the broker rather than lose it.
                error!("Failed to forward delivery, requeueing: {}", e);
                let options = BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                };
                if let Err(e) = delivery.nack(options).await {
                    error!("Failed to nack message: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl JobQueue for RabbitJobQueue {
    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_vec(item)?;
        self.publish_item(&self.settings.name, &payload, 1, None).await?;
        info!(job_id = %item.job_id, "Job enqueued");
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for RabbitJobQueue {
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let concurrency = concurrency.max(1);
        let slots = Arc::new(Semaphore::new(concurrency));

        loop {
            match self
                .consume_until_closed(&handler, &slots, concurrency, &shutdown)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    warn!("Consumer stopped: {}. Reconnecting in {:?}", e, RECONNECT_DELAY);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                    if let Err(e) = self.mq.reconnect().await {
                        error!("RabbitMQ reconnect failed: {}", e);
                    }
                }
            }
        }

        // Let in-flight deliveries settle before reporting the consumer stopped.
        let _ = slots.acquire_many(concurrency as u32).await;
        info!("Content worker consumer stopped");
        Ok(())
    }
}

pub fn retry_queue_name(base: &str, attempt: u32) -> String {
    format!("{}.retry.{}", base, attempt)
}

pub fn failed_queue_name(base: &str) -> String {
    format!("{}.failed", base)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn attempt_headers(attempt: u32, reason: Option<&str>) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(ATTEMPT_HEADER.into(), AMQPValue::LongLongInt(i64::from(attempt)));
    if let Some(reason) = reason {
        headers.insert(REASON_HEADER.into(), AMQPValue::LongString(LongString::from(reason)));
    }
    headers
}

/// Delivery number carried in the headers; first deliveries have none.
fn attempt_from(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == ATTEMPT_HEADER)
                .map(|(_, value)| value.clone())
        })
        .and_then(|value| match value {
            AMQPValue::LongLongInt(n) => u32::try_from(n).ok(),
            AMQPValue::LongInt(n) => u32::try_from(n).ok(),
            AMQPValue::LongUInt(n) => Some(n),
            AMQPValue::ShortInt(n) => u32::try_from(n).ok(),
            AMQPValue::ShortUInt(n) => Some(u32::from(n)),
            _ => None,
        })
        .filter(|n| *n >= 1)
        .unwrap_or(1)
}
