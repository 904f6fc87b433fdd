//! Shared identifiers for the order-fulfillment workspace.

mod ids;

pub use ids::{DealId, JobId, OrderId, PaymentReference, ProductId, StoreId, SubOrderId, UserId};
