//! HTTP surface of the order-fulfillment pipeline.
//!
//! Accepts paid checkouts, exposes orders and dead letters, and reports
//! health and Prometheus metrics. Fulfillment itself runs in the
//! [`pipeline`] consumer loops started by the binary.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{CheckoutPublisher, DeliveryStatusService, HealthReporter};
use queue::QueueClient;
use store::FulfillmentStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: FulfillmentStore, Q: QueueClient + ?Sized> {
    pub store: Arc<S>,
    pub publisher: CheckoutPublisher<Q>,
    pub delivery: DeliveryStatusService<S>,
    pub health: HealthReporter<S, Q>,
}

/// Wires the request-facing services over a store and a queue.
pub fn create_state<S, Q>(store: Arc<S>, queue: Arc<Q>, health_timeout: Duration) -> Arc<AppState<S, Q>>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    Arc::new(AppState {
        publisher: CheckoutPublisher::new(queue.clone()),
        delivery: DeliveryStatusService::new(store.clone()),
        health: HealthReporter::new(store.clone(), queue, health_timeout),
        store,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, Q>(state: Arc<AppState<S, Q>>, metrics_handle: PrometheusHandle) -> Router
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, Q>))
        .route("/checkout/jobs", post(routes::checkout::publish::<S, Q>))
        .route("/orders/{id}", get(routes::orders::get::<S, Q>))
        .route(
            "/orders/{id}/sub-orders/{sub_order_id}/status",
            patch(routes::orders::update_status::<S, Q>),
        )
        .route("/dead-letters", get(routes::dead_letters::list::<S, Q>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
