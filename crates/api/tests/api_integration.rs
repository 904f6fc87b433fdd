//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{JobId, PaymentReference};
use domain::{CartLine, CartSnapshot, CheckoutJob, InventoryRecord, Money, Order, ShippingSelection};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{FulfillmentProcessor, ORDER_QUEUE, Outcome};
use queue::InMemoryQueue;
use store::{DeadLetterStore, InMemoryFulfillmentStore, InventoryLedger, NewDeadLetter, OrderRepository};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    store: Arc<InMemoryFulfillmentStore>,
    queue: Arc<InMemoryQueue>,
}

async fn setup() -> TestApp {
    let store = Arc::new(InMemoryFulfillmentStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    pipeline::queues::declare_all(queue.as_ref()).await.unwrap();

    let state = api::create_state(store.clone(), queue.clone(), Duration::from_millis(500));
    let app = api::create_app(state, get_metrics_handle());
    TestApp { app, store, queue }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Runs a two-store checkout through the processor and returns the order.
async fn fulfilled_order(store: &Arc<InMemoryFulfillmentStore>) -> Order {
    store
        .upsert_inventory(&InventoryRecord::physical("mug", 10))
        .await
        .unwrap();
    store
        .upsert_inventory(&InventoryRecord::physical("lamp", 10))
        .await
        .unwrap();

    let job = CheckoutJob::new(
        "buyer-1",
        "pi_api_order",
        "card",
        CartSnapshot::new(vec![
            CartLine::physical("mug", "store-a", 2, Money::from_cents(1200)),
            CartLine::physical("lamp", "store-b", 1, Money::from_cents(4500)),
        ]),
        ShippingSelection::default(),
    );
    let processor = FulfillmentProcessor::new(store.clone());
    let Outcome::Fulfilled { order_id, .. } = processor.process(&job).await else {
        panic!("checkout was not fulfilled");
    };
    store.get_order(order_id).await.unwrap().unwrap()
}

fn status_uri(order: &Order, sub_order: usize) -> String {
    format!(
        "/orders/{}/sub-orders/{}/status",
        order.id, order.sub_orders[sub_order].id
    )
}

#[tokio::test]
async fn test_health_check_reports_queues() {
    let t = setup().await;

    let response = t.app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"]["connected"], true);
    assert_eq!(json["rabbitmq"]["connected"], true);
    assert_eq!(json["rabbitmq"]["queues"][ORDER_QUEUE]["messageCount"], 0);
    assert_eq!(json["rabbitmq"]["queues"][ORDER_QUEUE]["consumerCount"], 0);
}

#[tokio::test]
async fn test_health_check_unhealthy_when_broker_down() {
    let t = setup().await;
    t.queue.set_unavailable(true);

    let response = t.app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["rabbitmq"]["connected"], false);
    assert_eq!(json["database"]["connected"], true);
}

#[tokio::test]
async fn test_health_check_unhealthy_when_database_down() {
    let t = setup().await;
    t.store.set_unavailable(true);

    let response = t.app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["database"]["connected"], false);
}

#[tokio::test]
async fn test_checkout_is_accepted_and_queued() {
    let t = setup().await;

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/checkout/jobs",
            serde_json::json!({
                "userId": "buyer-7",
                "paymentReference": "pi_http",
                "paymentMethod": "card",
                "cartSnapshot": [{
                    "productId": "mug",
                    "productType": "physical",
                    "storeId": "store-a",
                    "quantity": 1,
                    "priceAtAdd": 1200,
                    "originalPrice": 1500
                }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    let expected = JobId::for_payment(&PaymentReference::new("pi_http"));
    assert_eq!(json["jobId"], expected.to_string());
    assert_eq!(json["paymentReference"], "pi_http");
    assert_eq!(json["attempt"], 0);

    let published = t.queue.published(ORDER_QUEUE).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload["userId"], "buyer-7");
}

#[tokio::test]
async fn test_checkout_with_empty_cart_is_rejected() {
    let t = setup().await;

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/checkout/jobs",
            serde_json::json!({
                "userId": "buyer-7",
                "paymentReference": "pi_empty",
                "paymentMethod": "card",
                "cartSnapshot": []
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("empty"));
    assert!(t.queue.published(ORDER_QUEUE).await.is_empty());
}

#[tokio::test]
async fn test_checkout_when_broker_down_is_unavailable() {
    let t = setup().await;
    t.queue.set_unavailable(true);

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/checkout/jobs",
            serde_json::json!({
                "userId": "buyer-7",
                "paymentReference": "pi_down",
                "paymentMethod": "card",
                "cartSnapshot": [{
                    "productId": "mug",
                    "productType": "physical",
                    "storeId": "store-a",
                    "quantity": 1,
                    "priceAtAdd": 1200,
                    "originalPrice": 1200
                }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_get_order_with_overall_status() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;

    let response = t
        .app
        .oneshot(get(&format!("/orders/{}", order.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["id"], order.id.to_string());
    assert_eq!(json["orderNumber"], order.order_number);
    assert_eq!(json["status"], "Confirmed");
    assert_eq!(json["subOrders"].as_array().unwrap().len(), 2);
    assert_eq!(json["overallStatus"], "Processing");
}

#[tokio::test]
async fn test_get_unknown_order() {
    let t = setup().await;

    let response = t
        .app
        .oneshot(get(&format!("/orders/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_order_with_invalid_id() {
    let t = setup().await;

    let response = t.app.oneshot(get("/orders/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_seller_advances_delivery_status() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &status_uri(&order, 0),
            serde_json::json!({ "newStatus": "Processing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["subOrders"][0]["deliveryStatus"], "Processing");
    assert_eq!(json["subOrders"][1]["deliveryStatus"], "Order Placed");

    let stored = t.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(
        stored.sub_orders[0].delivery_status,
        domain::DeliveryStatus::Processing
    );
}

#[tokio::test]
async fn test_skipping_a_delivery_step_conflicts() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;

    let response = t
        .app
        .oneshot(json_request(
            "PATCH",
            &status_uri(&order, 1),
            serde_json::json!({ "newStatus": "Delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let stored = t.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(
        stored.sub_orders[1].delivery_status,
        domain::DeliveryStatus::OrderPlaced
    );
}

#[tokio::test]
async fn test_canceled_sub_order_stays_canceled() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;
    let uri = status_uri(&order, 0);

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &uri,
            serde_json::json!({ "newStatus": "Canceled" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .oneshot(json_request(
            "PATCH",
            &uri,
            serde_json::json!({ "newStatus": "Processing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_held_order_cannot_be_shipped() {
    let t = setup().await;
    t.store
        .upsert_inventory(&InventoryRecord::physical("vase", 1))
        .await
        .unwrap();
    let job = CheckoutJob::new(
        "buyer-2",
        "pi_api_held",
        "card",
        CartSnapshot::new(vec![CartLine::physical(
            "vase",
            "store-a",
            3,
            Money::from_cents(2500),
        )]),
        ShippingSelection::default(),
    );
    let processor = FulfillmentProcessor::new(t.store.clone());
    let Outcome::DomainFailure {
        order_id: Some(order_id),
        ..
    } = processor.process(&job).await
    else {
        panic!("short stock should hold the order");
    };
    let order = t.store.get_order(order_id).await.unwrap().unwrap();

    let response = t
        .app
        .oneshot(json_request(
            "PATCH",
            &status_uri(&order, 0),
            serde_json::json!({ "newStatus": "Processing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("OnHold"));

    let stored = t.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(
        stored.sub_orders[0].delivery_status,
        domain::DeliveryStatus::OrderPlaced
    );
}

#[tokio::test]
async fn test_unknown_delivery_status_is_unprocessable() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;

    let response = t
        .app
        .oneshot(json_request(
            "PATCH",
            &status_uri(&order, 0),
            serde_json::json!({ "newStatus": "Teleported" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_sub_order() {
    let t = setup().await;
    let order = fulfilled_order(&t.store).await;

    let response = t
        .app
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{}/sub-orders/{}/status", order.id, uuid::Uuid::new_v4()),
            serde_json::json!({ "newStatus": "Processing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dead_letters_newest_first_with_limit() {
    let t = setup().await;
    let start = Utc::now();
    for (i, reason) in ["out of stock", "unknown product", "malformed"].iter().enumerate() {
        t.store
            .record_dead_letter(NewDeadLetter {
                job_id: None,
                payment_reference: Some(PaymentReference::new(format!("pi_dl_{i}"))),
                failure_class: "DomainInvalid".to_string(),
                reason: reason.to_string(),
                attempts: 0,
                payload: serde_json::json!({ "n": i }),
                recorded_at: start + chrono::Duration::seconds(i as i64),
            })
            .await
            .unwrap();
    }

    let response = t
        .app
        .clone()
        .oneshot(get("/dead-letters?limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["reason"], "malformed");
    assert_eq!(entries[0]["failureClass"], "DomainInvalid");
    assert_eq!(entries[1]["reason"], "unknown product");

    let response = t.app.oneshot(get("/dead-letters")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;

    let response = t.app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/plain"));
}
