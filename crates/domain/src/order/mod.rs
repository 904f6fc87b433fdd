//! Order aggregate and related types.

mod aggregate;
mod builder;
mod delivery;
mod status;

pub use aggregate::{Order, OrderItem, SubOrder};
pub use builder::{OrderBuilder, order_number};
pub use delivery::{DeliveryError, DeliveryStatus, overall_status};
pub use status::FulfillmentStatus;
