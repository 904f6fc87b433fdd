//! Consumer of the dead-letter queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use queue::{Delivery, HandlerDecision, MessageHandler};
use store::{DeadLetterStore, NewDeadLetter};

use crate::envelope::{DeadLetterEnvelope, FailureRecord};
use crate::outcome::FailureClass;

/// Records dead-lettered jobs for operators and raises an alert.
///
/// Never re-injects a job. A second arrival of the same job bumps the
/// existing record's `occurrences` instead of adding a record.
pub struct DeadLetterConsumer<S: DeadLetterStore> {
    store: Arc<S>,
}

impl<S: DeadLetterStore> DeadLetterConsumer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DeadLetterStore> MessageHandler for DeadLetterConsumer<S> {
    async fn handle(&self, delivery: &Delivery) -> HandlerDecision {
        let DeadLetterEnvelope { payload, failure } = match delivery.decode() {
            Ok(envelope) => envelope,
            Err(e) => DeadLetterEnvelope {
                failure: FailureRecord::for_payload(
                    &delivery.payload,
                    FailureClass::DomainInvalid,
                    format!("unreadable dead-letter message: {e}"),
                ),
                payload: delivery.payload.clone(),
            },
        };

        let entry = NewDeadLetter {
            job_id: failure.job_id,
            payment_reference: failure.payment_reference.clone(),
            failure_class: failure.failure_class.as_str().to_string(),
            reason: failure.reason.clone(),
            attempts: failure.attempt,
            payload,
            recorded_at: Utc::now(),
        };

        match self.store.record_dead_letter(entry).await {
            Ok(record) => {
                metrics::counter!(
                    "jobs_dead_lettered_total",
                    "failure_class" => failure.failure_class.as_str()
                )
                .increment(1);
                tracing::error!(
                    dead_letter_id = %record.id,
                    job_id = ?failure.job_id,
                    payment_reference = ?failure.payment_reference,
                    failure_class = %failure.failure_class,
                    attempt = failure.attempt,
                    occurrences = record.occurrences,
                    reason = %failure.reason,
                    "job dead-lettered"
                );
                HandlerDecision::Ack
            }
            Err(e) => {
                tracing::warn!(
                    job_id = ?failure.job_id,
                    error = %e,
                    "failed to record dead letter, requeueing"
                );
                HandlerDecision::Requeue
            }
        }
    }
}
