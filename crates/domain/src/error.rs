//! Domain error types.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::job::JobValidationError;
use crate::order::DeliveryError;

/// Errors that can occur during domain operations.
///
/// Every variant is deterministic: the same input fails the same way, so
/// none of them is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The checkout job is malformed.
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobValidationError),

    /// Stock could not be decremented.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// A delivery status change was refused.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}
