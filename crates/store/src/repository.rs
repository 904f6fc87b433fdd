use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DealId, OrderId, PaymentReference, ProductId, SubOrderId, UserId};
use domain::{
    CartSnapshot, Deal, DealRedemption, DeliveryStatus, FulfillmentStatus, InventoryRecord, Order,
    RedemptionNotes, StockDecrement,
};
use uuid::Uuid;

use crate::Result;
use crate::dead_letter::{DeadLetterRecord, NewDeadLetter};

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The order was new and has been stored.
    Inserted(Order),
    /// An order for the same payment reference already existed; it is returned unchanged.
    Existing(Order),
}

impl InsertOutcome {
    pub fn into_order(self) -> Order {
        match self {
            InsertOutcome::Inserted(order) | InsertOutcome::Existing(order) => order,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Result of committing an order's stock movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// The order's movements were committed earlier; nothing changed.
    AlreadyApplied,
}

/// What happened to one deal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Recorded(RedemptionNotes),
    /// This (deal, order, line) was counted before.
    AlreadyRecorded,
    /// The deal does not exist; the line was skipped.
    UnknownDeal,
}

/// Per-line report from [`DealAccountant::record_redemptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionReport {
    pub deal_id: DealId,
    pub line_no: u32,
    pub outcome: RedemptionOutcome,
}

/// Persistence of orders and their sub-orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Looks up the order created for a payment reference.
    async fn find_by_payment_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>>;

    /// Retrieves an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Stores the order unless one already exists for its payment reference.
    ///
    /// Two concurrent inserts for the same payment reference converge on a
    /// single row; the loser receives [`InsertOutcome::Existing`].
    async fn insert_order(&self, order: &Order) -> Result<InsertOutcome>;

    /// Moves a `Pending` order to `status`.
    ///
    /// Setting the status the order already has is a no-op. Any other move
    /// out of a terminal status fails with [`StoreError::StatusConflict`].
    ///
    /// [`StoreError::StatusConflict`]: crate::StoreError::StatusConflict
    async fn set_fulfillment_status(
        &self,
        order_id: OrderId,
        status: FulfillmentStatus,
        hold_reason: Option<&str>,
    ) -> Result<Order>;

    /// Compare-and-set of a sub-order's delivery status.
    ///
    /// Fails with `StatusConflict` when the current status is not `from`.
    /// Transition legality is checked by the caller.
    async fn update_delivery_status(
        &self,
        order_id: OrderId,
        sub_order_id: SubOrderId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Order>;
}

/// Stock ledger. The consistency boundary for inventory.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Applies all of an order's decrements atomically.
    ///
    /// Either every line is decremented or none is, in which case the
    /// [`domain::InventoryError`] of the first failing line is returned.
    /// Committing the same order again is a no-op.
    async fn commit_decrements(
        &self,
        order_id: OrderId,
        decrements: &[StockDecrement],
    ) -> Result<CommitOutcome>;

    /// Returns the current stock record of a product.
    async fn inventory(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>>;

    /// Creates or replaces a product's stock record.
    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<()>;
}

/// Deal usage accounting.
#[async_trait]
pub trait DealAccountant: Send + Sync {
    /// Records one redemption per deal line, idempotent per (deal, order, line).
    ///
    /// All lines are applied in one atomic step. Reports come back ordered
    /// by deal and line.
    async fn record_redemptions(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        redemptions: &[DealRedemption],
        at: DateTime<Utc>,
    ) -> Result<Vec<RedemptionReport>>;

    /// Returns a deal with its analytics.
    async fn deal(&self, deal_id: &DealId) -> Result<Option<Deal>>;

    /// Creates or replaces a deal.
    async fn upsert_deal(&self, deal: &Deal) -> Result<()>;
}

/// Live shopping carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn save_cart(&self, user_id: &UserId, cart: &CartSnapshot) -> Result<()>;

    /// Returns the user's cart; empty when none exists.
    async fn get_cart(&self, user_id: &UserId) -> Result<CartSnapshot>;

    /// Empties the user's cart. Clearing an empty cart is a no-op.
    async fn clear_cart(&self, user_id: &UserId) -> Result<()>;
}

/// Operator-facing record of failed jobs.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Upserts by [`NewDeadLetter::record_id`]; a repeat arrival bumps `occurrences`.
    async fn record_dead_letter(&self, entry: NewDeadLetter) -> Result<DeadLetterRecord>;

    /// Returns the most recently recorded entries first.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>>;

    async fn dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>>;
}

/// Connectivity probe.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Everything the pipeline needs from persistence.
pub trait FulfillmentStore:
    OrderRepository + InventoryLedger + DealAccountant + CartStore + DeadLetterStore + StoreHealth
{
}

// Blanket implementation for every type providing all the parts
impl<T> FulfillmentStore for T where
    T: OrderRepository + InventoryLedger + DealAccountant + CartStore + DeadLetterStore + StoreHealth
{
}
