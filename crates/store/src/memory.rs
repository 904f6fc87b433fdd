use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DealId, OrderId, PaymentReference, ProductId, SubOrderId, UserId};
use domain::{
    CartSnapshot, Deal, DealRedemption, DeliveryStatus, FulfillmentStatus, InventoryError,
    InventoryRecord, Order, StockDecrement, lock_order,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dead_letter::{DeadLetterRecord, NewDeadLetter};
use crate::repository::{
    CartStore, CommitOutcome, DealAccountant, DeadLetterStore, InsertOutcome, InventoryLedger,
    OrderRepository, RedemptionOutcome, RedemptionReport, StoreHealth,
};
use crate::{Result, StoreError};

#[derive(Default)]
struct InventoryState {
    records: HashMap<ProductId, InventoryRecord>,
    committed: HashSet<OrderId>,
}

#[derive(Default)]
struct DealState {
    deals: HashMap<DealId, Deal>,
    /// (deal, order, line) -> redeeming user
    redemptions: HashMap<(DealId, OrderId, u32), UserId>,
}

impl DealState {
    fn user_redemptions(&self, deal_id: &DealId, user_id: &UserId) -> u32 {
        let count = self
            .redemptions
            .iter()
            .filter(|((deal, _, _), user)| deal == deal_id && *user == user_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

#[derive(Default)]
struct FaultInjector {
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
}

impl FaultInjector {
    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        let tripped = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Unavailable("injected transient fault".to_string()));
        }
        Ok(())
    }
}

/// In-memory fulfillment store for testing and database-less runs.
///
/// This implementation keeps every table in memory and provides the same
/// semantics as the PostgreSQL implementation, including atomic and
/// idempotent inventory commits. Transient faults can be injected with
/// [`set_unavailable`](Self::set_unavailable) and
/// [`fail_next_operations`](Self::fail_next_operations).
#[derive(Clone, Default)]
pub struct InMemoryFulfillmentStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    inventory: Arc<RwLock<InventoryState>>,
    deals: Arc<RwLock<DealState>>,
    carts: Arc<RwLock<HashMap<UserId, CartSnapshot>>>,
    dead_letters: Arc<RwLock<HashMap<Uuid, DeadLetterRecord>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryFulfillmentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with a transient error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `n` operations fail with a transient error.
    pub fn fail_next_operations(&self, n: usize) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns the number of dead-letter records.
    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.read().await.len()
    }

    /// Clears every table.
    pub async fn clear(&self) {
        self.orders.write().await.clear();
        *self.inventory.write().await = InventoryState::default();
        *self.deals.write().await = DealState::default();
        self.carts.write().await.clear();
        self.dead_letters.write().await.clear();
    }
}

#[async_trait]
impl OrderRepository for InMemoryFulfillmentStore {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        self.faults.check()?;
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| &o.payment_reference == payment_reference)
            .cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.faults.check()?;
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<InsertOutcome> {
        self.faults.check()?;
        let mut orders = self.orders.write().await;

        // Unique constraint simulation on payment reference and id
        if let Some(existing) = orders
            .values()
            .find(|o| o.payment_reference == order.payment_reference || o.id == order.id)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        orders.insert(order.id, order.clone());
        Ok(InsertOutcome::Inserted(order.clone()))
    }

    async fn set_fulfillment_status(
        &self,
        order_id: OrderId,
        status: FulfillmentStatus,
        hold_reason: Option<&str>,
    ) -> Result<Order> {
        self.faults.check()?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if order.status == status {
            return Ok(order.clone());
        }
        if !order.status.can_transition_to(status) {
            return Err(StoreError::StatusConflict {
                expected: FulfillmentStatus::Pending.to_string(),
                actual: order.status.to_string(),
            });
        }

        order.status = status;
        order.hold_reason = hold_reason.map(str::to_string);
        Ok(order.clone())
    }

    async fn update_delivery_status(
        &self,
        order_id: OrderId,
        sub_order_id: SubOrderId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Order> {
        self.faults.check()?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        let sub_order = order
            .sub_orders
            .iter_mut()
            .find(|s| s.id == sub_order_id)
            .ok_or(StoreError::SubOrderNotFound {
                order_id,
                sub_order_id,
            })?;

        if sub_order.delivery_status != from {
            return Err(StoreError::StatusConflict {
                expected: from.to_string(),
                actual: sub_order.delivery_status.to_string(),
            });
        }

        sub_order.delivery_status = to;
        Ok(order.clone())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryFulfillmentStore {
    async fn commit_decrements(
        &self,
        order_id: OrderId,
        decrements: &[StockDecrement],
    ) -> Result<CommitOutcome> {
        self.faults.check()?;
        let mut state = self.inventory.write().await;

        if state.committed.contains(&order_id) {
            return Ok(CommitOutcome::AlreadyApplied);
        }

        let mut ordered = decrements.to_vec();
        lock_order(&mut ordered);

        // Stage on copies so a failing line leaves every record untouched
        let mut staged: HashMap<ProductId, InventoryRecord> = HashMap::new();
        for d in &ordered {
            if !staged.contains_key(&d.product_id) {
                let record = state.records.get(&d.product_id).cloned().ok_or_else(|| {
                    InventoryError::UnknownProduct {
                        product_id: d.product_id.clone(),
                    }
                })?;
                staged.insert(d.product_id.clone(), record);
            }
            if let Some(record) = staged.get_mut(&d.product_id) {
                record.decrement(d.size.as_deref(), d.quantity)?;
            }
        }

        state.records.extend(staged);
        state.committed.insert(order_id);
        Ok(CommitOutcome::Applied)
    }

    async fn inventory(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        self.faults.check()?;
        Ok(self.inventory.read().await.records.get(product_id).cloned())
    }

    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<()> {
        self.faults.check()?;
        self.inventory
            .write()
            .await
            .records
            .insert(record.product_id.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl DealAccountant for InMemoryFulfillmentStore {
    async fn record_redemptions(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        redemptions: &[DealRedemption],
        at: DateTime<Utc>,
    ) -> Result<Vec<RedemptionReport>> {
        self.faults.check()?;
        let mut state = self.deals.write().await;
        let mut ordered: Vec<&DealRedemption> = redemptions.iter().collect();
        ordered.sort_by(|a, b| a.deal_id.cmp(&b.deal_id).then(a.line_no.cmp(&b.line_no)));
        let mut reports = Vec::with_capacity(ordered.len());

        for redemption in ordered {
            let key = (redemption.deal_id.clone(), order_id, redemption.line_no);
            let outcome = if !state.deals.contains_key(&redemption.deal_id) {
                RedemptionOutcome::UnknownDeal
            } else if state.redemptions.contains_key(&key) {
                RedemptionOutcome::AlreadyRecorded
            } else {
                let prior = state.user_redemptions(&redemption.deal_id, user_id);
                state.redemptions.insert(key, user_id.clone());
                match state.deals.get_mut(&redemption.deal_id) {
                    Some(deal) => RedemptionOutcome::Recorded(
                        deal.record_redemption(user_id, redemption, prior, at),
                    ),
                    None => RedemptionOutcome::UnknownDeal,
                }
            };

            reports.push(RedemptionReport {
                deal_id: redemption.deal_id.clone(),
                line_no: redemption.line_no,
                outcome,
            });
        }

        Ok(reports)
    }

    async fn deal(&self, deal_id: &DealId) -> Result<Option<Deal>> {
        self.faults.check()?;
        Ok(self.deals.read().await.deals.get(deal_id).cloned())
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<()> {
        self.faults.check()?;
        self.deals
            .write()
            .await
            .deals
            .insert(deal.deal_id.clone(), deal.clone());
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryFulfillmentStore {
    async fn save_cart(&self, user_id: &UserId, cart: &CartSnapshot) -> Result<()> {
        self.faults.check()?;
        self.carts
            .write()
            .await
            .insert(user_id.clone(), cart.clone());
        Ok(())
    }

    async fn get_cart(&self, user_id: &UserId) -> Result<CartSnapshot> {
        self.faults.check()?;
        Ok(self
            .carts
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_cart(&self, user_id: &UserId) -> Result<()> {
        self.faults.check()?;
        self.carts.write().await.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryFulfillmentStore {
    async fn record_dead_letter(&self, entry: NewDeadLetter) -> Result<DeadLetterRecord> {
        self.faults.check()?;
        let mut records = self.dead_letters.write().await;
        let id = entry.record_id();

        let record = match records.get_mut(&id) {
            Some(existing) => {
                existing.merge(entry);
                existing.clone()
            }
            None => {
                let record = entry.into_record();
                records.insert(id, record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        self.faults.check()?;
        let records = self.dead_letters.read().await;
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by(|a, b| {
            b.last_recorded_at
                .cmp(&a.last_recorded_at)
                .then(a.id.cmp(&b.id))
        });
        list.truncate(limit);
        Ok(list)
    }

    async fn dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>> {
        self.faults.check()?;
        Ok(self.dead_letters.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl StoreHealth for InMemoryFulfillmentStore {
    async fn ping(&self) -> Result<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}
