//! Order reads and seller delivery updates.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{OrderId, SubOrderId};
use domain::{DeliveryStatus, Order};
use queue::QueueClient;
use serde::{Deserialize, Serialize};
use store::FulfillmentStore;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub new_status: DeliveryStatus,
}

/// An order with its derived overall delivery status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub overall_status: DeliveryStatus,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let overall_status = order.overall_status();
        Self {
            order,
            overall_status,
        }
    }
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let order_id = OrderId::from_uuid(parse_uuid(&id, "order")?);
    let order = state.delivery.order(order_id).await?;
    Ok(Json(order.into()))
}

/// PATCH /orders/{id}/sub-orders/{sub_order_id}/status
#[tracing::instrument(skip(state, request), fields(new_status = %request.new_status))]
pub async fn update_status<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
    Path((id, sub_order_id)): Path<(String, String)>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let order_id = OrderId::from_uuid(parse_uuid(&id, "order")?);
    let sub_order_id = SubOrderId::from_uuid(parse_uuid(&sub_order_id, "sub-order")?);

    let order = state
        .delivery
        .update_status(order_id, sub_order_id, request.new_status)
        .await?;
    Ok(Json(order.into()))
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(s).map_err(|_| ApiError::BadRequest(format!("invalid {what} ID: {s}")))
}
