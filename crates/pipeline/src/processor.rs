//! Turns one checkout job into a confirmed order.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use domain::{CheckoutJob, FulfillmentStatus, InventoryError, Order, OrderBuilder};
use store::{FulfillmentStore, RedemptionOutcome, StoreError};

use crate::error::FulfillmentError;
use crate::outcome::{FailureClass, Outcome};

/// Applies a checkout job to the store, step by step.
///
/// Every step is idempotent, so the same job may be processed any number of
/// times (redelivery, retries, two workers racing) and the store converges
/// on one confirmed order with one decrement per line.
pub struct FulfillmentProcessor<S: FulfillmentStore> {
    store: Arc<S>,
}

impl<S: FulfillmentStore> FulfillmentProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Processes a job and reports what happened. Never panics on bad input.
    #[tracing::instrument(
        skip(self, job),
        fields(
            job_id = %job.job_id(),
            payment_reference = %job.payment_reference(),
            attempt = job.attempt(),
        )
    )]
    pub async fn process(&self, job: &CheckoutJob) -> Outcome {
        let start = Instant::now();

        let outcome = match self.try_process(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let failure_class = e.failure_class();
                tracing::warn!(%failure_class, error = %e, "checkout job failed");
                match failure_class {
                    FailureClass::Transient => Outcome::TransientFailure {
                        reason: e.to_string(),
                    },
                    _ => Outcome::DomainFailure {
                        order_id: e.order_id(),
                        reason: e.to_string(),
                    },
                }
            }
        };

        metrics::histogram!("fulfillment_duration_seconds", "outcome" => outcome.label())
            .record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn try_process(&self, job: &CheckoutJob) -> Result<Outcome, FulfillmentError> {
        job.validate()?;

        // 1. Idempotency check, then 2-3. build and persist the order
        let order = match self
            .store
            .find_by_payment_reference(job.payment_reference())
            .await?
        {
            Some(order) => order,
            None => {
                let order = OrderBuilder::new(job).build()?;
                let inserted = self.store.insert_order(&order).await?;
                if inserted.was_inserted() {
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        sub_orders = order.sub_orders.len(),
                        "order created"
                    );
                }
                inserted.into_order()
            }
        };

        match order.status {
            FulfillmentStatus::Confirmed => {
                tracing::info!(order_id = %order.id, "order already confirmed, skipping");
                metrics::counter!("orders_duplicate_total").increment(1);
                return Ok(Outcome::Duplicate { order_id: order.id });
            }
            FulfillmentStatus::OnHold => {
                return Err(FulfillmentError::OrderOnHold {
                    order_id: order.id,
                    reason: order.hold_reason.clone().unwrap_or_default(),
                });
            }
            FulfillmentStatus::Pending => {}
        }

        // 4. Inventory
        self.commit_inventory(&order).await?;

        // 5. Deals
        self.record_deals(&order).await?;

        // 6. Cart
        self.clear_purchased_lines(job, &order).await?;

        // 7. Confirm
        let order = self
            .store
            .set_fulfillment_status(order.id, FulfillmentStatus::Confirmed, None)
            .await?;

        metrics::counter!("orders_fulfilled_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_cents = order.total_amount.cents(),
            "order fulfilled"
        );

        Ok(Outcome::Fulfilled {
            order_id: order.id,
            order_number: order.order_number,
        })
    }

    /// Removes the purchased lines from the buyer's live cart.
    ///
    /// Lines added after checkout survive, also when a pending order is
    /// resumed later. The cart row is deleted once nothing is left.
    async fn clear_purchased_lines(
        &self,
        job: &CheckoutJob,
        order: &Order,
    ) -> Result<(), FulfillmentError> {
        let live = self.store.get_cart(&order.user_id).await?;
        let remaining = live.without_lines_of(job.cart_snapshot());

        if remaining.is_empty() {
            self.store.clear_cart(&order.user_id).await?;
        } else if remaining.len() != live.len() {
            tracing::debug!(order_id = %order.id, kept = remaining.len(), "cart keeps lines added after checkout");
            self.store.save_cart(&order.user_id, &remaining).await?;
        }
        Ok(())
    }

    /// Decrements stock for every line, or holds the order if any line is short.
    async fn commit_inventory(&self, order: &Order) -> Result<(), FulfillmentError> {
        let decrements = order.stock_decrements();
        match self.store.commit_decrements(order.id, &decrements).await {
            Ok(outcome) => {
                tracing::debug!(order_id = %order.id, ?outcome, lines = decrements.len(), "inventory committed");
                Ok(())
            }
            Err(StoreError::Inventory(source)) => {
                if matches!(source, InventoryError::InsufficientStock { .. }) {
                    metrics::counter!("inventory_insufficient_total").increment(1);
                }
                let reason = source.to_string();
                self.store
                    .set_fulfillment_status(order.id, FulfillmentStatus::OnHold, Some(&reason))
                    .await?;
                tracing::warn!(order_id = %order.id, %reason, "order put on hold");
                Err(FulfillmentError::Inventory {
                    order_id: order.id,
                    source,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_deals(&self, order: &Order) -> Result<(), FulfillmentError> {
        let redemptions = order.deal_redemptions();
        if redemptions.is_empty() {
            return Ok(());
        }

        let reports = self
            .store
            .record_redemptions(order.id, &order.user_id, &redemptions, Utc::now())
            .await?;

        for report in reports {
            match report.outcome {
                RedemptionOutcome::Recorded(notes) if !notes.is_clean() => {
                    tracing::warn!(
                        order_id = %order.id,
                        deal_id = %report.deal_id,
                        line_no = report.line_no,
                        flash_sale_oversold = notes.flash_sale_oversold,
                        user_limit_exceeded = notes.user_limit_exceeded,
                        "deal redemption flagged for reconciliation"
                    );
                }
                RedemptionOutcome::UnknownDeal => {
                    tracing::warn!(
                        order_id = %order.id,
                        deal_id = %report.deal_id,
                        line_no = report.line_no,
                        "line references an unknown deal, skipped"
                    );
                }
                RedemptionOutcome::Recorded(_) | RedemptionOutcome::AlreadyRecorded => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{DealId, PaymentReference, UserId};
    use domain::{
        CartLine, CartSnapshot, Deal, DealInfo, InventoryRecord, Money, ShippingSelection,
    };
    use store::{
        CartStore, DealAccountant, InMemoryFulfillmentStore, InventoryLedger, OrderRepository,
    };

    use super::*;

    fn processor() -> (FulfillmentProcessor<InMemoryFulfillmentStore>, Arc<InMemoryFulfillmentStore>) {
        let store = Arc::new(InMemoryFulfillmentStore::new());
        (FulfillmentProcessor::new(store.clone()), store)
    }

    fn job(reference: &str, lines: Vec<CartLine>) -> CheckoutJob {
        CheckoutJob::new(
            "user-1",
            reference,
            "card",
            CartSnapshot::new(lines),
            ShippingSelection::default(),
        )
    }

    #[tokio::test]
    async fn test_fulfils_and_confirms() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 3))
            .await
            .unwrap();
        store
            .save_cart(
                &UserId::new("user-1"),
                &CartSnapshot::new(vec![CartLine::physical("p1", "s1", 2, Money::from_cents(100))]),
            )
            .await
            .unwrap();

        let job = job("pi_1", vec![CartLine::physical("p1", "s1", 2, Money::from_cents(100))]);
        let outcome = processor.process(&job).await;
        assert!(matches!(outcome, Outcome::Fulfilled { .. }));

        let order = store
            .find_by_payment_reference(&PaymentReference::new("pi_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, FulfillmentStatus::Confirmed);
        assert_eq!(
            store.inventory(&"p1".into()).await.unwrap().unwrap().available(None).unwrap(),
            Some(1)
        );
        assert!(store.get_cart(&UserId::new("user-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_a_duplicate() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 5))
            .await
            .unwrap();
        let job = job("pi_2", vec![CartLine::physical("p1", "s1", 2, Money::from_cents(100))]);

        assert!(matches!(processor.process(&job).await, Outcome::Fulfilled { .. }));
        assert!(matches!(
            processor.process(&job.next_attempt()).await,
            Outcome::Duplicate { .. }
        ));
        assert_eq!(store.order_count().await, 1);
        assert_eq!(
            store.inventory(&"p1".into()).await.unwrap().unwrap().available(None).unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_short_stock_holds_the_order() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 1))
            .await
            .unwrap();
        let job = job("pi_3", vec![CartLine::physical("p1", "s1", 2, Money::from_cents(100))]);

        let outcome = processor.process(&job).await;
        let Outcome::DomainFailure { order_id, reason } = outcome else {
            panic!("expected domain failure, got {outcome:?}");
        };
        assert!(reason.contains("insufficient stock"));

        let order = store.get_order(order_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(order.status, FulfillmentStatus::OnHold);
        assert!(order.hold_reason.unwrap().contains("insufficient stock"));

        // Redelivery of a held order stays a domain failure
        assert!(matches!(
            processor.process(&job).await,
            Outcome::DomainFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_job_is_a_domain_failure_without_order() {
        let (processor, store) = processor();
        let job = job("pi_4", vec![]);
        assert!(matches!(
            processor.process(&job).await,
            Outcome::DomainFailure { order_id: None, .. }
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_overflowing_amount_is_a_domain_failure() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 5))
            .await
            .unwrap();
        let job = job(
            "pi_overflow",
            vec![CartLine::physical("p1", "s1", 2, Money::from_cents(i64::MAX / 2 + 1))],
        );

        let outcome = processor.process(&job).await;
        let Outcome::DomainFailure { order_id, reason } = outcome else {
            panic!("expected domain failure, got {outcome:?}");
        };
        assert_eq!(order_id, None);
        assert!(reason.contains("exceeds"));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_lines_added_after_checkout_stay_in_the_cart() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 5))
            .await
            .unwrap();
        let user = UserId::new("user-1");
        let bought = CartLine::physical("p1", "s1", 1, Money::from_cents(100));
        let added_later = CartLine::physical("p2", "s1", 1, Money::from_cents(250));
        store
            .save_cart(&user, &CartSnapshot::new(vec![bought.clone(), added_later.clone()]))
            .await
            .unwrap();

        let job = job("pi_later", vec![bought]);
        assert!(matches!(processor.process(&job).await, Outcome::Fulfilled { .. }));

        let cart = store.get_cart(&user).await.unwrap();
        assert_eq!(cart.lines(), &[added_later]);
    }

    #[tokio::test]
    async fn test_store_outage_is_transient_and_resumes_later() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 5))
            .await
            .unwrap();
        let job = job("pi_5", vec![CartLine::physical("p1", "s1", 1, Money::from_cents(100))]);

        store.set_unavailable(true);
        assert!(matches!(
            processor.process(&job).await,
            Outcome::TransientFailure { .. }
        ));
        store.set_unavailable(false);

        assert!(matches!(processor.process(&job).await, Outcome::Fulfilled { .. }));
        assert_eq!(
            store.inventory(&"p1".into()).await.unwrap().unwrap().available(None).unwrap(),
            Some(4)
        );
    }

    #[tokio::test]
    async fn test_pending_order_resumes_without_double_decrement() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 5))
            .await
            .unwrap();
        let job = job("pi_6", vec![CartLine::physical("p1", "s1", 2, Money::from_cents(100))]);

        // Simulate a crash after the inventory commit
        let order = OrderBuilder::new(&job).build().unwrap();
        store.insert_order(&order).await.unwrap();
        store
            .commit_decrements(order.id, &order.stock_decrements())
            .await
            .unwrap();

        assert!(matches!(processor.process(&job).await, Outcome::Fulfilled { .. }));
        assert_eq!(
            store.inventory(&"p1".into()).await.unwrap().unwrap().available(None).unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_deal_lines_are_counted_once() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 10))
            .await
            .unwrap();
        store.upsert_deal(&Deal::flash_sale("deal-1", 5)).await.unwrap();

        let line = CartLine::physical("p1", "s1", 2, Money::from_cents(800)).with_deal(
            DealInfo {
                deal_id: DealId::new("deal-1"),
                is_flash_sale: true,
            },
            Money::from_cents(1000),
        );
        let job = job("pi_7", vec![line]);

        assert!(matches!(processor.process(&job).await, Outcome::Fulfilled { .. }));
        assert!(matches!(processor.process(&job).await, Outcome::Duplicate { .. }));

        let deal = store.deal(&DealId::new("deal-1")).await.unwrap().unwrap();
        assert_eq!(deal.usage_count, 1);
        assert_eq!(deal.flash_sale_remaining, Some(3));
        assert_eq!(deal.analytics.redemption_count, 1);
        assert_eq!(deal.analytics.total_discount_amount, Money::from_cents(400));
        assert_eq!(deal.analytics.unique_users_used, vec![UserId::new("user-1")]);
    }

    #[tokio::test]
    async fn test_unknown_deal_does_not_fail_the_order() {
        let (processor, store) = processor();
        store
            .upsert_inventory(&InventoryRecord::physical("p1", 10))
            .await
            .unwrap();
        let line = CartLine::physical("p1", "s1", 1, Money::from_cents(800)).with_deal(
            DealInfo {
                deal_id: DealId::new("ghost"),
                is_flash_sale: false,
            },
            Money::from_cents(1000),
        );

        assert!(matches!(
            processor.process(&job("pi_8", vec![line])).await,
            Outcome::Fulfilled { .. }
        ));
    }
}
