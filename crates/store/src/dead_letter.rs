use chrono::{DateTime, Utc};
use common::{JobId, PaymentReference};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for dead-letter keys of payloads that carry no job id.
const PAYLOAD_NAMESPACE: Uuid = Uuid::from_u128(0x9c41_7a02_55e3_4b6d_8f19_0e2b_c4d7_a318);

/// A job that could not be fulfilled, kept for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub job_id: Option<JobId>,
    pub payment_reference: Option<PaymentReference>,
    pub failure_class: String,
    pub reason: String,
    pub attempts: u32,
    /// The message as it arrived, including unparseable payloads.
    pub payload: serde_json::Value,
    pub first_recorded_at: DateTime<Utc>,
    pub last_recorded_at: DateTime<Utc>,
    /// How many times this job reached the dead-letter store.
    pub occurrences: u32,
}

/// A dead-letter arrival to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeadLetter {
    pub job_id: Option<JobId>,
    pub payment_reference: Option<PaymentReference>,
    pub failure_class: String,
    pub reason: String,
    pub attempts: u32,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl NewDeadLetter {
    /// Returns the upsert key.
    ///
    /// Arrivals for the same job share a record; payloads without a job id
    /// are keyed by their content.
    pub fn record_id(&self) -> Uuid {
        match self.job_id {
            Some(job_id) => job_id.as_uuid(),
            None => Uuid::new_v5(&PAYLOAD_NAMESPACE, self.payload.to_string().as_bytes()),
        }
    }

    /// Builds the record for a first arrival.
    pub fn into_record(self) -> DeadLetterRecord {
        DeadLetterRecord {
            id: self.record_id(),
            job_id: self.job_id,
            payment_reference: self.payment_reference,
            failure_class: self.failure_class,
            reason: self.reason,
            attempts: self.attempts,
            payload: self.payload,
            first_recorded_at: self.recorded_at,
            last_recorded_at: self.recorded_at,
            occurrences: 1,
        }
    }
}

impl DeadLetterRecord {
    /// Folds a repeated arrival into this record.
    pub fn merge(&mut self, arrival: NewDeadLetter) {
        self.failure_class = arrival.failure_class;
        self.reason = arrival.reason;
        self.attempts = self.attempts.max(arrival.attempts);
        self.payload = arrival.payload;
        self.last_recorded_at = arrival.recorded_at;
        self.occurrences += 1;
        if self.payment_reference.is_none() {
            self.payment_reference = arrival.payment_reference;
        }
    }
}
