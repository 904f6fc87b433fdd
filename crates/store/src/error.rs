use common::{OrderId, SubOrderId};
use domain::InventoryError;
use thiserror::Error;

/// Errors that can occur when interacting with the fulfillment store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stock could not be decremented; nothing was applied.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The sub-order was not found in the order.
    #[error("Sub-order {sub_order_id} not found in order {order_id}")]
    SubOrderNotFound {
        order_id: OrderId,
        sub_order_id: SubOrderId,
    },

    /// A compare-and-set status update found a different current value.
    #[error("Status conflict: expected {expected}, found {actual}")]
    StatusConflict { expected: String, actual: String },

    /// A stored value could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The backend is temporarily unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => is_transient_sqlx(e),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            // 08: connection exception, 40001: serialization failure,
            // 40P01: deadlock, 57P0x: server shutting down.
            code.starts_with("08") || code == "40001" || code == "40P01" || code.starts_with("57P0")
        }),
        _ => false,
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn test_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(
            !StoreError::Inventory(InventoryError::UnknownProduct {
                product_id: ProductId::new("p1"),
            })
            .is_transient()
        );
        assert!(!StoreError::OrderNotFound(OrderId::new()).is_transient());
    }
}
