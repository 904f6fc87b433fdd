//! Producer side: turning a confirmed payment into a checkout job.

use std::sync::Arc;

use common::{PaymentReference, UserId};
use domain::{CartSnapshot, CheckoutJob, PaymentMethod, ShippingSelection};
use queue::{QueueClient, QueueClientExt};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::queues::ORDER_QUEUE;

/// Body of `POST /checkout/jobs`, sent once the payment is confirmed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub payment_reference: PaymentReference,
    pub payment_method: PaymentMethod,
    pub cart_snapshot: CartSnapshot,
    #[serde(default)]
    pub shipping_selection: ShippingSelection,
}

/// Validates checkout requests and publishes them to the order queue.
pub struct CheckoutPublisher<Q: QueueClient + ?Sized> {
    queue: Arc<Q>,
}

impl<Q: QueueClient + ?Sized> CheckoutPublisher<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }

    /// Publishes the first attempt of the job. The job id is derived from the
    /// payment reference, so publishing the same payment twice is harmless.
    #[tracing::instrument(skip(self, request), fields(payment_reference = %request.payment_reference))]
    pub async fn publish(&self, request: CheckoutRequest) -> Result<CheckoutJob, PipelineError> {
        let job = CheckoutJob::new(
            request.user_id,
            request.payment_reference,
            request.payment_method,
            request.cart_snapshot,
            request.shipping_selection,
        );
        job.validate()?;

        self.queue.publish(ORDER_QUEUE, &job).await?;
        tracing::info!(job_id = %job.job_id(), lines = job.cart_snapshot().len(), "checkout job published");
        Ok(job)
    }
}
