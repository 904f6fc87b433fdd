//! Assembles a multi-store order from a checkout job.

use chrono::{DateTime, Utc};
use common::{OrderId, SubOrderId};

use crate::job::{CheckoutJob, JobValidationError};
use crate::money::Money;

use super::aggregate::{Order, OrderItem, SubOrder};
use super::delivery::DeliveryStatus;
use super::status::FulfillmentStatus;

/// Formats the human-readable order number, e.g. `ORD-20240131-1A2B3C4D`.
///
/// The suffix comes from the order id, so the same payment reference always
/// yields the same number.
pub fn order_number(order_id: OrderId, created_at: DateTime<Utc>) -> String {
    let simple = order_id.as_uuid().simple().to_string();
    format!(
        "ORD-{}-{}",
        created_at.format("%Y%m%d"),
        simple[..8].to_uppercase()
    )
}

/// Builds the `Pending` order for a checkout job.
///
/// Lines are grouped by store in first-seen order; each sub-order's subtotal
/// is the sum of its line totals and the store's shipping cost is added on
/// top for the order total.
pub struct OrderBuilder<'a> {
    job: &'a CheckoutJob,
    created_at: Option<DateTime<Utc>>,
}

impl<'a> OrderBuilder<'a> {
    pub fn new(job: &'a CheckoutJob) -> Self {
        Self {
            job,
            created_at: None,
        }
    }

    /// Pins the creation timestamp (defaults to now).
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Validates the job and assembles the order.
    pub fn build(self) -> Result<Order, JobValidationError> {
        self.job.validate()?;

        let job = self.job;
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let order_id = OrderId::for_payment(job.payment_reference());
        let shipping = job.shipping_selection();

        let sub_orders: Vec<SubOrder> = job
            .cart_snapshot()
            .group_by_store()
            .into_iter()
            .map(|(store_id, lines)| {
                let items: Vec<OrderItem> = lines
                    .into_iter()
                    .map(|(line_no, line)| OrderItem {
                        line_no,
                        product_id: line.product_id.clone(),
                        product_type: line.product_type,
                        quantity: line.quantity,
                        selected_size: line.selected_size.clone(),
                        unit_price: line.price_at_add,
                        original_price: line.original_price,
                        deal: line.deal_info.clone(),
                    })
                    .collect();
                let subtotal: Money = items.iter().map(OrderItem::total_price).sum();
                let choice = shipping.for_store(&store_id);

                SubOrder {
                    id: SubOrderId::for_store(order_id, &store_id),
                    shipping_method: choice.map(|c| c.method.clone()),
                    shipping_cost: choice.map(|c| c.cost).unwrap_or_default(),
                    store_id,
                    items,
                    subtotal,
                    delivery_status: DeliveryStatus::OrderPlaced,
                }
            })
            .collect();

        let total_amount = sub_orders.iter().map(SubOrder::total).sum();

        Ok(Order {
            id: order_id,
            order_number: order_number(order_id, created_at),
            user_id: job.user_id().clone(),
            payment_reference: job.payment_reference().clone(),
            payment_method: job.payment_method().clone(),
            total_amount,
            status: FulfillmentStatus::Pending,
            sub_orders,
            created_at,
            hold_reason: None,
        })
    }
}
