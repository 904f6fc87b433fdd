//! Seller-facing delivery status updates.

use std::sync::Arc;

use common::{OrderId, SubOrderId};
use domain::{DeliveryStatus, FulfillmentStatus, Order};
use store::OrderRepository;

use crate::error::PipelineError;

/// Reads orders and advances sub-order delivery status.
pub struct DeliveryStatusService<S: OrderRepository + ?Sized> {
    store: Arc<S>,
}

impl<S: OrderRepository + ?Sized> DeliveryStatusService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, PipelineError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(PipelineError::OrderNotFound(order_id))
    }

    /// Moves a sub-order to `new_status`.
    ///
    /// Only confirmed orders ship: a pending order has not committed its stock
    /// yet and a held one never will. Only the next state in the delivery
    /// chain, or `Canceled`, is accepted.
    /// The write is a compare-and-set against the status read here, so two
    /// sellers racing on the same sub-order cannot both win.
    #[tracing::instrument(skip(self), fields(new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        sub_order_id: SubOrderId,
        new_status: DeliveryStatus,
    ) -> Result<Order, PipelineError> {
        let order = self.order(order_id).await?;
        if order.status != FulfillmentStatus::Confirmed {
            return Err(PipelineError::OrderNotConfirmed {
                order_id,
                status: order.status,
            });
        }

        let current = order
            .sub_order(sub_order_id)
            .ok_or(PipelineError::SubOrderNotFound {
                order_id,
                sub_order_id,
            })?
            .delivery_status;

        let next = current.transition_to(new_status)?;
        let order = self
            .store
            .update_delivery_status(order_id, sub_order_id, current, next)
            .await?;

        tracing::info!(from = %current, to = %next, "delivery status updated");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use domain::{CartLine, CartSnapshot, CheckoutJob, Money, OrderBuilder, ShippingSelection};
    use store::InMemoryFulfillmentStore;

    use super::*;

    async fn seeded_with(
        status: FulfillmentStatus,
    ) -> (DeliveryStatusService<InMemoryFulfillmentStore>, Order) {
        let store = Arc::new(InMemoryFulfillmentStore::new());
        let job = CheckoutJob::new(
            "user-1",
            "pi_del",
            "card",
            CartSnapshot::new(vec![
                CartLine::physical("p1", "store-a", 1, Money::from_cents(100)),
                CartLine::physical("p2", "store-b", 1, Money::from_cents(100)),
            ]),
            ShippingSelection::default(),
        );
        let order = OrderBuilder::new(&job).build().unwrap();
        store.insert_order(&order).await.unwrap();
        let order = match status {
            FulfillmentStatus::Pending => order,
            FulfillmentStatus::OnHold => store
                .set_fulfillment_status(order.id, status, Some("insufficient stock"))
                .await
                .unwrap(),
            FulfillmentStatus::Confirmed => store
                .set_fulfillment_status(order.id, status, None)
                .await
                .unwrap(),
        };
        (DeliveryStatusService::new(store), order)
    }

    async fn seeded() -> (DeliveryStatusService<InMemoryFulfillmentStore>, Order) {
        seeded_with(FulfillmentStatus::Confirmed).await
    }

    #[tokio::test]
    async fn test_walks_the_chain_and_updates_overall_status() {
        let (service, order) = seeded().await;
        let sub = order.sub_orders[0].id;

        for status in [
            DeliveryStatus::Processing,
            DeliveryStatus::Shipped,
            DeliveryStatus::OutForDelivery,
        ] {
            service.update_status(order.id, sub, status).await.unwrap();
        }

        let order = service.order(order.id).await.unwrap();
        assert_eq!(order.sub_orders[0].delivery_status, DeliveryStatus::OutForDelivery);
        assert_eq!(order.overall_status(), DeliveryStatus::OutForDelivery);
    }

    #[tokio::test]
    async fn test_skipping_a_state_is_rejected() {
        let (service, order) = seeded().await;
        let err = service
            .update_status(order.id, order.sub_orders[0].id, DeliveryStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_canceled_is_terminal() {
        let (service, order) = seeded().await;
        let sub = order.sub_orders[1].id;
        service
            .update_status(order.id, sub, DeliveryStatus::Canceled)
            .await
            .unwrap();
        let err = service
            .update_status(order.id, sub, DeliveryStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_held_order_cannot_ship() {
        let (service, order) = seeded_with(FulfillmentStatus::OnHold).await;
        let sub = order.sub_orders[0].id;

        let err = service
            .update_status(order.id, sub, DeliveryStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OrderNotConfirmed {
                status: FulfillmentStatus::OnHold,
                ..
            }
        ));

        let order = service.order(order.id).await.unwrap();
        assert_eq!(order.sub_orders[0].delivery_status, DeliveryStatus::OrderPlaced);
    }

    #[tokio::test]
    async fn test_pending_order_cannot_ship() {
        let (service, order) = seeded_with(FulfillmentStatus::Pending).await;
        let err = service
            .update_status(order.id, order.sub_orders[0].id, DeliveryStatus::Canceled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OrderNotConfirmed {
                status: FulfillmentStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (service, order) = seeded().await;
        assert!(matches!(
            service
                .update_status(OrderId::new(), order.sub_orders[0].id, DeliveryStatus::Processing)
                .await,
            Err(PipelineError::OrderNotFound(_))
        ));
        assert!(matches!(
            service
                .update_status(order.id, SubOrderId::new(), DeliveryStatus::Processing)
                .await,
            Err(PipelineError::SubOrderNotFound { .. })
        ));
    }
}
