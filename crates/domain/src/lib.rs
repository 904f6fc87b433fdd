//! Domain layer for the order-fulfillment pipeline.
//!
//! This crate provides the pure fulfillment model including:
//! - Checkout jobs with their frozen cart snapshot and shipping selection
//! - Inventory records and the never-negative decrement rule
//! - Deal usage accounting
//! - The multi-store order aggregate, its builder and the delivery state machine

pub mod cart;
pub mod deal;
pub mod error;
pub mod inventory;
pub mod job;
pub mod money;
pub mod order;

pub use cart::{CartLine, CartSnapshot, DealInfo, ProductType, ShippingSelection, StoreShipping};
pub use deal::{Deal, DealAnalytics, DealRedemption, RedemptionNotes};
pub use error::DomainError;
pub use inventory::{InventoryError, InventoryRecord, StockDecrement, StockLevel, lock_order};
pub use job::{CheckoutJob, JobValidationError, PaymentMethod};
pub use money::Money;
pub use order::{
    DeliveryError, DeliveryStatus, FulfillmentStatus, Order, OrderBuilder, OrderItem, SubOrder,
    order_number, overall_status,
};
