use common::{OrderId, SubOrderId};
use domain::{DeliveryError, FulfillmentStatus, InventoryError, JobValidationError};
use queue::QueueError;
use store::StoreError;
use thiserror::Error;

use crate::outcome::FailureClass;

/// Why processing a checkout job stopped.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The job can never be fulfilled as published.
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobValidationError),

    /// Stock could not be committed; the order was put on hold.
    #[error("Order {order_id} put on hold: {source}")]
    Inventory {
        order_id: OrderId,
        #[source]
        source: InventoryError,
    },

    /// The order was put on hold by an earlier delivery.
    #[error("Order {order_id} is on hold: {reason}")]
    OrderOnHold { order_id: OrderId, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    /// Classifies the failure for routing.
    ///
    /// Only store outages are retried; every other store error is
    /// dead-lettered like a domain failure.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            FulfillmentError::Store(e) if e.is_transient() => FailureClass::Transient,
            _ => FailureClass::DomainInvalid,
        }
    }

    /// The order the failure concerns, when one was created.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            FulfillmentError::Inventory { order_id, .. }
            | FulfillmentError::OrderOnHold { order_id, .. } => Some(*order_id),
            FulfillmentError::Store(StoreError::OrderNotFound(order_id)) => Some(*order_id),
            _ => None,
        }
    }
}

/// Errors of the pipeline's request-facing operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobValidationError),

    #[error("Invalid status change: {0}")]
    InvalidTransition(#[from] DeliveryError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Sub-order {sub_order_id} not found in order {order_id}")]
    SubOrderNotFound {
        order_id: OrderId,
        sub_order_id: SubOrderId,
    },

    /// Delivery only starts once fulfillment has committed every side effect.
    #[error("Order {order_id} is {status}; delivery updates need a confirmed order")]
    OrderNotConfirmed {
        order_id: OrderId,
        status: FulfillmentStatus,
    },

    /// Someone else changed the same record first.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl PipelineError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_transient(),
            PipelineError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(order_id) => PipelineError::OrderNotFound(order_id),
            StoreError::SubOrderNotFound {
                order_id,
                sub_order_id,
            } => PipelineError::SubOrderNotFound {
                order_id,
                sub_order_id,
            },
            StoreError::StatusConflict { expected, actual } => PipelineError::Conflict(format!(
                "expected status {expected}, found {actual}"
            )),
            other => PipelineError::Store(other),
        }
    }
}
