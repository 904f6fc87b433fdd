//! Order aggregate: one logical order split into per-store sub-orders.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentReference, ProductId, StoreId, SubOrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::cart::{DealInfo, ProductType};
use crate::deal::DealRedemption;
use crate::inventory::StockDecrement;
use crate::job::PaymentMethod;
use crate::money::Money;

use super::delivery::{DeliveryStatus, overall_status};
use super::status::FulfillmentStatus;

/// A purchased line inside a sub-order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Position of the line in the originating cart snapshot.
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_size: Option<String>,
    pub unit_price: Money,
    pub original_price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal: Option<DealInfo>,
}

impl OrderItem {
    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    /// Returns the discount granted by the deal, if any.
    pub fn discount(&self) -> Money {
        self.original_price
            .saturating_sub(self.unit_price)
            .multiply(self.quantity)
    }
}

/// The part of an order fulfilled by a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrder {
    pub id: SubOrderId,
    pub store_id: StoreId,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_method: Option<String>,
    pub shipping_cost: Money,
    pub delivery_status: DeliveryStatus,
}

impl SubOrder {
    /// Returns subtotal plus shipping.
    pub fn total(&self) -> Money {
        self.subtotal + self.shipping_cost
    }
}

/// Order aggregate root.
///
/// Exactly one order exists per payment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub payment_reference: PaymentReference,
    pub payment_method: PaymentMethod,
    pub total_amount: Money,
    pub status: FulfillmentStatus,
    pub sub_orders: Vec<SubOrder>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,
}

impl Order {
    /// Returns the sub-order with the given id.
    pub fn sub_order(&self, id: SubOrderId) -> Option<&SubOrder> {
        self.sub_orders.iter().find(|s| s.id == id)
    }

    /// Returns the sub-order for a store.
    pub fn sub_order_for_store(&self, store_id: &StoreId) -> Option<&SubOrder> {
        self.sub_orders.iter().find(|s| &s.store_id == store_id)
    }

    /// Returns all items across sub-orders.
    pub fn items(&self) -> impl Iterator<Item = &OrderItem> {
        self.sub_orders.iter().flat_map(|s| s.items.iter())
    }

    /// Returns the total number of items.
    pub fn item_count(&self) -> usize {
        self.sub_orders.iter().map(|s| s.items.len()).sum()
    }

    /// Returns the overall delivery status, computed from the sub-orders.
    pub fn overall_status(&self) -> DeliveryStatus {
        let statuses: Vec<DeliveryStatus> =
            self.sub_orders.iter().map(|s| s.delivery_status).collect();
        overall_status(&statuses)
    }

    /// Returns true once every fulfillment side effect has committed.
    pub fn is_confirmed(&self) -> bool {
        self.status == FulfillmentStatus::Confirmed
    }

    /// Returns the stock movements this order requires, one per item.
    ///
    /// Physical and digital items are both returned; the ledger decides
    /// whether a product's stock is limited.
    pub fn stock_decrements(&self) -> Vec<StockDecrement> {
        self.items()
            .map(|item| StockDecrement {
                line_no: item.line_no,
                product_id: item.product_id.clone(),
                size: item.selected_size.clone(),
                quantity: item.quantity,
            })
            .collect()
    }

    /// Returns one redemption per item that carries a deal.
    pub fn deal_redemptions(&self) -> Vec<DealRedemption> {
        self.items()
            .filter_map(|item| {
                item.deal.as_ref().map(|deal| DealRedemption {
                    deal_id: deal.deal_id.clone(),
                    line_no: item.line_no,
                    quantity: item.quantity,
                    discount: item.discount(),
                    is_flash_sale: deal.is_flash_sale,
                })
            })
            .collect()
    }
}
