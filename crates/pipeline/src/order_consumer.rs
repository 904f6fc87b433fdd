//! Consumer of the order queue.

use std::sync::Arc;

use async_trait::async_trait;
use domain::CheckoutJob;
use queue::{Delivery, HandlerDecision, MessageHandler, QueueClient, QueueClientExt};
use store::FulfillmentStore;

use crate::envelope::{DeadLetterEnvelope, FailureRecord, RetryEnvelope};
use crate::outcome::{FailureClass, Outcome};
use crate::processor::FulfillmentProcessor;
use crate::queues::{DEAD_LETTER_QUEUE, RETRY_QUEUE};

/// Fulfils checkout jobs and routes the failures.
///
/// Transient failures go to the retry queue, domain failures straight to the
/// dead-letter queue. The delivery is acknowledged only once the job is
/// fulfilled or routed; if routing fails the message is requeued.
pub struct OrderQueueConsumer<S: FulfillmentStore, Q: QueueClient + ?Sized> {
    processor: FulfillmentProcessor<S>,
    queue: Arc<Q>,
    max_deliveries: u32,
}

impl<S: FulfillmentStore, Q: QueueClient + ?Sized> OrderQueueConsumer<S, Q> {
    /// `max_deliveries` bounds how often one message may be handed out
    /// before it is treated as a poison message.
    pub fn new(store: Arc<S>, queue: Arc<Q>, max_deliveries: u32) -> Self {
        Self {
            processor: FulfillmentProcessor::new(store),
            queue,
            max_deliveries,
        }
    }

    pub fn processor(&self) -> &FulfillmentProcessor<S> {
        &self.processor
    }

    async fn retry(&self, job: &CheckoutJob, reason: &str) -> HandlerDecision {
        let failure = FailureRecord::for_job(job, FailureClass::Transient, reason);
        tracing::warn!(
            job_id = %job.job_id(),
            payment_reference = %job.payment_reference(),
            failure_class = %failure.failure_class,
            attempt = job.attempt(),
            reason,
            "routing job to retry queue"
        );

        let envelope = RetryEnvelope {
            job: job.clone(),
            failure,
        };
        match self.queue.publish(RETRY_QUEUE, &envelope).await {
            Ok(_) => HandlerDecision::Ack,
            Err(e) => {
                tracing::error!(job_id = %job.job_id(), error = %e, "failed to route job to retry queue");
                HandlerDecision::Requeue
            }
        }
    }

    async fn dead_letter(&self, envelope: DeadLetterEnvelope) -> HandlerDecision {
        let failure = &envelope.failure;
        tracing::warn!(
            job_id = ?failure.job_id,
            payment_reference = ?failure.payment_reference,
            failure_class = %failure.failure_class,
            attempt = failure.attempt,
            reason = %failure.reason,
            "routing job to dead-letter queue"
        );

        match self.queue.publish(DEAD_LETTER_QUEUE, &envelope).await {
            Ok(_) => HandlerDecision::Ack,
            Err(e) => {
                tracing::error!(
                    job_id = ?envelope.failure.job_id,
                    error = %e,
                    "failed to route job to dead-letter queue"
                );
                HandlerDecision::Requeue
            }
        }
    }

    async fn dead_letter_payload(
        &self,
        delivery: &Delivery,
        failure_class: FailureClass,
        reason: String,
    ) -> HandlerDecision {
        let failure = FailureRecord::for_payload(&delivery.payload, failure_class, reason);
        self.dead_letter(DeadLetterEnvelope::for_payload(delivery.payload.clone(), failure))
            .await
    }
}

#[async_trait]
impl<S, Q> MessageHandler for OrderQueueConsumer<S, Q>
where
    S: FulfillmentStore,
    Q: QueueClient + ?Sized,
{
    async fn handle(&self, delivery: &Delivery) -> HandlerDecision {
        if delivery.delivery_count > self.max_deliveries {
            let reason = format!(
                "delivered {} times without completing (max {})",
                delivery.delivery_count, self.max_deliveries
            );
            return self
                .dead_letter_payload(delivery, FailureClass::Fatal, reason)
                .await;
        }

        let job: CheckoutJob = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                let reason = format!("malformed checkout job: {e}");
                return self
                    .dead_letter_payload(delivery, FailureClass::DomainInvalid, reason)
                    .await;
            }
        };

        match self.processor.process(&job).await {
            Outcome::Fulfilled { .. } | Outcome::Duplicate { .. } => HandlerDecision::Ack,
            Outcome::TransientFailure { reason } => self.retry(&job, &reason).await,
            Outcome::DomainFailure { reason, .. } => {
                let failure = FailureRecord::for_job(&job, FailureClass::DomainInvalid, reason);
                match DeadLetterEnvelope::for_job(&job, failure) {
                    Ok(envelope) => self.dead_letter(envelope).await,
                    Err(e) => {
                        tracing::error!(job_id = %job.job_id(), error = %e, "failed to encode job");
                        HandlerDecision::Requeue
                    }
                }
            }
        }
    }
}
