//! The asynchronous order-fulfillment pipeline.
//!
//! A paid checkout is published as a [`CheckoutJob`](domain::CheckoutJob) to
//! the order queue. The [`OrderQueueConsumer`] turns it into a confirmed
//! multi-store order through the [`FulfillmentProcessor`]:
//!
//! 1. Idempotency check by payment reference
//! 2. Order creation (one sub-order per store), persisted as `Pending`
//! 3. Atomic inventory decrement
//! 4. Deal accounting
//! 5. Cart clearing
//! 6. Confirmation
//!
//! Transient failures travel through the retry queue
//! ([`RetryQueueConsumer`]) with exponential delays; domain failures and jobs
//! that exhausted their retries end in the dead-letter store
//! ([`DeadLetterConsumer`]).

pub mod dead_letter;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod health;
pub mod order_consumer;
pub mod outcome;
pub mod processor;
pub mod publisher;
pub mod queues;
pub mod retry;
pub mod runtime;

pub use dead_letter::DeadLetterConsumer;
pub use delivery::DeliveryStatusService;
pub use envelope::{DeadLetterEnvelope, FailureRecord, RetryEnvelope};
pub use error::{FulfillmentError, PipelineError};
pub use health::{BrokerHealth, DatabaseHealth, HealthReport, HealthReporter, HealthStatus};
pub use order_consumer::OrderQueueConsumer;
pub use outcome::{FailureClass, Outcome};
pub use processor::FulfillmentProcessor;
pub use publisher::{CheckoutPublisher, CheckoutRequest};
pub use queues::{DEAD_LETTER_QUEUE, ORDER_QUEUE, RETRY_QUEUE};
pub use retry::{RetryPolicy, RetryQueueConsumer};
pub use runtime::{Pipeline, PipelineConfig};
