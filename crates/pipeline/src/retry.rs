//! Retry policy and the consumer of the retry queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue::{Backoff, Delivery, HandlerDecision, MessageHandler, QueueClient, QueueClientExt};

use crate::envelope::{DeadLetterEnvelope, FailureRecord, RetryEnvelope};
use crate::outcome::FailureClass;
use crate::queues::{DEAD_LETTER_QUEUE, ORDER_QUEUE};

/// How often, and how patiently, transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Backoff::new(self.base_delay, self.max_delay).delay_for(attempt)
    }

    /// Returns true if a job that failed at `attempt` may run again.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Re-publishes transiently failed jobs to the order queue after a delay.
pub struct RetryQueueConsumer<Q: QueueClient + ?Sized> {
    queue: Arc<Q>,
    policy: RetryPolicy,
}

impl<Q: QueueClient + ?Sized> RetryQueueConsumer<Q> {
    pub fn new(queue: Arc<Q>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn forward_to_dead_letter(&self, envelope: DeadLetterEnvelope) -> HandlerDecision {
        match self.queue.publish(DEAD_LETTER_QUEUE, &envelope).await {
            Ok(_) => HandlerDecision::Ack,
            Err(e) => {
                tracing::error!(
                    job_id = ?envelope.failure.job_id,
                    error = %e,
                    "failed to forward job to dead-letter queue"
                );
                HandlerDecision::Requeue
            }
        }
    }
}

#[async_trait]
impl<Q: QueueClient + ?Sized> MessageHandler for RetryQueueConsumer<Q> {
    async fn handle(&self, delivery: &Delivery) -> HandlerDecision {
        let RetryEnvelope { job, failure } = match delivery.decode() {
            Ok(envelope) => envelope,
            Err(e) => {
                let failure = FailureRecord::for_payload(
                    &delivery.payload,
                    FailureClass::DomainInvalid,
                    format!("malformed retry envelope: {e}"),
                );
                tracing::warn!(reason = %failure.reason, "dead-lettering unreadable retry message");
                return self
                    .forward_to_dead_letter(DeadLetterEnvelope::for_payload(
                        delivery.payload.clone(),
                        failure,
                    ))
                    .await;
            }
        };

        if self.policy.allows_retry(job.attempt()) {
            let delay = self.policy.delay_for(job.attempt());
            let next = job.next_attempt();
            return match self.queue.publish_delayed(ORDER_QUEUE, &next, delay).await {
                Ok(_) => {
                    metrics::counter!("jobs_retried_total").increment(1);
                    tracing::info!(
                        job_id = %job.job_id(),
                        payment_reference = %job.payment_reference(),
                        attempt = next.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %failure.reason,
                        "job scheduled for retry"
                    );
                    HandlerDecision::Ack
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id(), error = %e, "failed to schedule retry");
                    HandlerDecision::Requeue
                }
            };
        }

        let exhausted = FailureRecord {
            reason: format!("retry budget exhausted: {}", failure.reason),
            ..FailureRecord::for_job(&job, failure.failure_class, "")
        };
        tracing::warn!(
            job_id = %job.job_id(),
            payment_reference = %job.payment_reference(),
            failure_class = %exhausted.failure_class,
            attempt = job.attempt(),
            reason = %exhausted.reason,
            "retry budget exhausted"
        );

        match DeadLetterEnvelope::for_job(&job, exhausted) {
            Ok(envelope) => self.forward_to_dead_letter(envelope).await,
            Err(e) => {
                tracing::error!(job_id = %job.job_id(), error = %e, "failed to encode job");
                HandlerDecision::Requeue
            }
        }
    }
}
