//! Payloads of the retry and dead-letter queues.

use chrono::{DateTime, Utc};
use common::{JobId, PaymentReference};
use domain::CheckoutJob;
use serde::{Deserialize, Serialize};

use crate::outcome::FailureClass;

/// Structured description of a failed job, carried with it to the next queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub job_id: Option<JobId>,
    pub payment_reference: Option<PaymentReference>,
    pub failure_class: FailureClass,
    pub reason: String,
    /// Attempt number of the job when it failed.
    pub attempt: u32,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn for_job(job: &CheckoutJob, failure_class: FailureClass, reason: impl Into<String>) -> Self {
        Self {
            job_id: Some(job.job_id()),
            payment_reference: Some(job.payment_reference().clone()),
            failure_class,
            reason: reason.into(),
            attempt: job.attempt(),
            recorded_at: Utc::now(),
        }
    }

    /// Describes a payload that could not be decoded, salvaging what it can.
    pub fn for_payload(
        payload: &serde_json::Value,
        failure_class: FailureClass,
        reason: impl Into<String>,
    ) -> Self {
        let job = payload.get("job").unwrap_or(payload);
        Self {
            job_id: job
                .get("jobId")
                .and_then(|v| JobId::deserialize(v).ok()),
            payment_reference: job
                .get("paymentReference")
                .and_then(|v| v.as_str())
                .map(PaymentReference::new),
            failure_class,
            reason: reason.into(),
            attempt: job
                .get("attempt")
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or_default(),
            recorded_at: Utc::now(),
        }
    }
}

/// Message on the retry queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEnvelope {
    pub job: CheckoutJob,
    pub failure: FailureRecord,
}

/// Message on the dead-letter queue.
///
/// `payload` is the job when it could be decoded, otherwise the raw message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub payload: serde_json::Value,
    pub failure: FailureRecord,
}

impl DeadLetterEnvelope {
    pub fn for_job(job: &CheckoutJob, failure: FailureRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_value(job)?,
            failure,
        })
    }

    pub fn for_payload(payload: serde_json::Value, failure: FailureRecord) -> Self {
        Self { payload, failure }
    }
}
