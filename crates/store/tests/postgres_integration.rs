//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{DealId, PaymentReference, ProductId, UserId};
use domain::{
    CartLine, CartSnapshot, CheckoutJob, Deal, DealInfo, DeliveryStatus, FulfillmentStatus,
    InventoryError, InventoryRecord, Money, OrderBuilder, ShippingSelection,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartStore, CommitOutcome, DealAccountant, DeadLetterStore, InsertOutcome, InventoryLedger,
    NewDeadLetter, OrderRepository, PostgresFulfillmentStore, RedemptionOutcome, StoreError,
    StoreHealth,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresFulfillmentStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresFulfillmentStore {
    let info = get_container_info().await;

    // Create a fresh pool for each test to avoid connection issues
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query(
        "TRUNCATE TABLE orders, sub_orders, product_inventory, product_sizes, inventory_commits, \
         inventory_movements, deals, deal_unique_users, deal_redemptions, carts, dead_letters",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresFulfillmentStore::new(pool)
}

fn two_store_job(payment_reference: &str) -> CheckoutJob {
    let cart = CartSnapshot::new(vec![
        CartLine::physical("shirt", "store-a", 1, Money::from_cents(2500)).with_size("M"),
        CartLine::physical("mug", "store-a", 1, Money::from_cents(900)),
        CartLine::physical("lamp", "store-b", 2, Money::from_cents(4000)).with_deal(
            DealInfo {
                deal_id: DealId::new("lamp-flash"),
                is_flash_sale: true,
            },
            Money::from_cents(5000),
        ),
    ]);
    let shipping = ShippingSelection::default().with_store("store-b", "express", Money::from_cents(1200));
    CheckoutJob::new("buyer-1", payment_reference, "card", cart, shipping)
}

async fn seed_inventory(store: &PostgresFulfillmentStore, lamps: u32) {
    store
        .upsert_inventory(&InventoryRecord::physical_sized("shirt", [("M", 1), ("L", 4)]))
        .await
        .unwrap();
    store
        .upsert_inventory(&InventoryRecord::physical("mug", 1))
        .await
        .unwrap();
    store
        .upsert_inventory(&InventoryRecord::physical("lamp", lamps))
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_insert_and_load_order() {
    let store = get_test_store().await;
    let order = OrderBuilder::new(&two_store_job("pi_load")).build().unwrap();

    let outcome = store.insert_order(&order).await.unwrap();
    assert!(outcome.was_inserted());

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.sub_orders.len(), 2);
    assert_eq!(loaded.sub_orders[0].items.len(), 2);
    assert_eq!(loaded.total_amount, order.total_amount);
    assert_eq!(loaded.status, FulfillmentStatus::Pending);

    let by_reference = store
        .find_by_payment_reference(&PaymentReference::new("pi_load"))
        .await
        .unwrap();
    assert_eq!(by_reference.map(|o| o.id), Some(order.id));
}

#[tokio::test]
#[serial]
async fn test_concurrent_inserts_converge_on_one_order() {
    let store = get_test_store().await;
    let order = OrderBuilder::new(&two_store_job("pi_race")).build().unwrap();

    let (a, b) = tokio::join!(store.insert_order(&order), store.insert_order(&order));
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.was_inserted()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, InsertOutcome::Existing(existing) if existing.id == order.id))
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn test_commit_decrements_scenario() {
    let store = get_test_store().await;
    seed_inventory(&store, 5).await;
    let order = OrderBuilder::new(&two_store_job("pi_stock")).build().unwrap();

    let first = store
        .commit_decrements(order.id, &order.stock_decrements())
        .await
        .unwrap();
    let again = store
        .commit_decrements(order.id, &order.stock_decrements())
        .await
        .unwrap();

    assert_eq!(first, CommitOutcome::Applied);
    assert_eq!(again, CommitOutcome::AlreadyApplied);

    let shirt = store.inventory(&ProductId::new("shirt")).await.unwrap().unwrap();
    assert_eq!(shirt.available(Some("M")).unwrap(), Some(0));
    assert_eq!(shirt.available(Some("L")).unwrap(), Some(4));
    let mug = store.inventory(&ProductId::new("mug")).await.unwrap().unwrap();
    assert_eq!(mug.available(None).unwrap(), Some(0));
    let lamp = store.inventory(&ProductId::new("lamp")).await.unwrap().unwrap();
    assert_eq!(lamp.available(None).unwrap(), Some(3));
}

#[tokio::test]
#[serial]
async fn test_short_line_rolls_back_every_decrement() {
    let store = get_test_store().await;
    seed_inventory(&store, 1).await;
    let order = OrderBuilder::new(&two_store_job("pi_short")).build().unwrap();

    let err = store
        .commit_decrements(order.id, &order.stock_decrements())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Inventory(InventoryError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        })
    ));
    let mug = store.inventory(&ProductId::new("mug")).await.unwrap().unwrap();
    assert_eq!(mug.available(None).unwrap(), Some(1));
    let shirt = store.inventory(&ProductId::new("shirt")).await.unwrap().unwrap();
    assert_eq!(shirt.available(Some("M")).unwrap(), Some(1));
}

#[tokio::test]
#[serial]
async fn test_concurrent_orders_never_oversell() {
    let store = get_test_store().await;
    store
        .upsert_inventory(&InventoryRecord::physical_sized("sneaker", [("42", 3)]))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let cart = CartSnapshot::new(vec![
                CartLine::physical("sneaker", "store-a", 1, Money::from_cents(9000)).with_size("42"),
            ]);
            let job = CheckoutJob::new(
                format!("buyer-{i}"),
                format!("pi_sneaker_{i}"),
                "card",
                cart,
                ShippingSelection::default(),
            );
            let order = OrderBuilder::new(&job).build().unwrap();
            store
                .commit_decrements(order.id, &order.stock_decrements())
                .await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(CommitOutcome::Applied) => succeeded += 1,
            Err(StoreError::Inventory(InventoryError::InsufficientStock { .. })) => {
                insufficient += 1
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(insufficient, 5);
    let sneaker = store.inventory(&ProductId::new("sneaker")).await.unwrap().unwrap();
    assert_eq!(sneaker.available(Some("42")).unwrap(), Some(0));
}

#[tokio::test]
#[serial]
async fn test_redemptions_are_idempotent() {
    let store = get_test_store().await;
    store
        .upsert_deal(&Deal::flash_sale("lamp-flash", 10))
        .await
        .unwrap();
    let order = OrderBuilder::new(&two_store_job("pi_deal")).build().unwrap();
    let user = UserId::new("buyer-1");

    for _ in 0..2 {
        store
            .record_redemptions(order.id, &user, &order.deal_redemptions(), Utc::now())
            .await
            .unwrap();
    }

    let deal = store.deal(&DealId::new("lamp-flash")).await.unwrap().unwrap();
    assert_eq!(deal.usage_count, 1);
    assert_eq!(deal.analytics.redemption_count, 1);
    assert_eq!(deal.analytics.unique_users_used, vec![user]);
    assert_eq!(deal.flash_sale_remaining, Some(8));
    assert_eq!(deal.analytics.total_discount_amount.cents(), 2000);
    assert!(deal.analytics.first_redemption_date.is_some());
}

#[tokio::test]
#[serial]
async fn test_flash_sale_exhaustion_is_flagged() {
    let store = get_test_store().await;
    store
        .upsert_deal(&Deal::flash_sale("lamp-flash", 1))
        .await
        .unwrap();
    let order = OrderBuilder::new(&two_store_job("pi_flash")).build().unwrap();

    let reports = store
        .record_redemptions(order.id, &UserId::new("buyer-1"), &order.deal_redemptions(), Utc::now())
        .await
        .unwrap();

    assert!(matches!(
        reports[0].outcome,
        RedemptionOutcome::Recorded(notes) if notes.flash_sale_oversold
    ));
    let deal = store.deal(&DealId::new("lamp-flash")).await.unwrap().unwrap();
    assert_eq!(deal.flash_sale_remaining, Some(0));
}

#[tokio::test]
#[serial]
async fn test_status_updates_are_compare_and_set() {
    let store = get_test_store().await;
    let order = OrderBuilder::new(&two_store_job("pi_status")).build().unwrap();
    store.insert_order(&order).await.unwrap();

    let confirmed = store
        .set_fulfillment_status(order.id, FulfillmentStatus::Confirmed, None)
        .await
        .unwrap();
    assert!(confirmed.is_confirmed());
    // Repeating is a no-op
    store
        .set_fulfillment_status(order.id, FulfillmentStatus::Confirmed, None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .set_fulfillment_status(order.id, FulfillmentStatus::OnHold, Some("late"))
            .await,
        Err(StoreError::StatusConflict { .. })
    ));

    let sub = order.sub_orders[1].id;
    let updated = store
        .update_delivery_status(order.id, sub, DeliveryStatus::OrderPlaced, DeliveryStatus::Processing)
        .await
        .unwrap();
    assert_eq!(
        updated.sub_order(sub).unwrap().delivery_status,
        DeliveryStatus::Processing
    );
    assert!(matches!(
        store
            .update_delivery_status(order.id, sub, DeliveryStatus::OrderPlaced, DeliveryStatus::Canceled)
            .await,
        Err(StoreError::StatusConflict { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_carts_and_dead_letters() {
    let store = get_test_store().await;
    let job = two_store_job("pi_cart");

    store.save_cart(job.user_id(), job.cart_snapshot()).await.unwrap();
    assert_eq!(store.get_cart(job.user_id()).await.unwrap().len(), 3);
    store.clear_cart(job.user_id()).await.unwrap();
    store.clear_cart(job.user_id()).await.unwrap();
    assert!(store.get_cart(job.user_id()).await.unwrap().is_empty());

    let entry = NewDeadLetter {
        job_id: Some(job.job_id()),
        payment_reference: Some(job.payment_reference().clone()),
        failure_class: "DomainInvalid".into(),
        reason: "insufficient stock".into(),
        attempts: 0,
        payload: serde_json::to_value(&job).unwrap(),
        recorded_at: Utc::now(),
    };
    store.record_dead_letter(entry.clone()).await.unwrap();
    let record = store.record_dead_letter(entry).await.unwrap();
    assert_eq!(record.occurrences, 2);

    let listed = store.list_dead_letters(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].job_id, Some(job.job_id()));
    assert!(store.dead_letter(record.id).await.unwrap().is_some());

    store.ping().await.unwrap();
}
