//! Producer endpoint: publishes paid checkouts for fulfillment.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{JobId, PaymentReference};
use pipeline::CheckoutRequest;
use queue::QueueClient;
use serde::Serialize;
use store::FulfillmentStore;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAcceptedResponse {
    pub job_id: JobId,
    pub payment_reference: PaymentReference,
    pub attempt: u32,
}

/// POST /checkout/jobs: validates the checkout and queues it.
///
/// The order itself is created asynchronously; the response only confirms
/// the job was accepted.
#[tracing::instrument(skip(state, request), fields(payment_reference = %request.payment_reference))]
pub async fn publish<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<JobAcceptedResponse>), ApiError>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let job = state.publisher.publish(request).await?;
    metrics::counter!("checkout_jobs_accepted_total").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            job_id: job.job_id(),
            payment_reference: job.payment_reference().clone(),
            attempt: job.attempt(),
        }),
    ))
}
