//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use pipeline::HealthReport;
use queue::QueueClient;
use store::FulfillmentStore;

use crate::AppState;

/// GET /health: broker and database connectivity with per-queue depth.
///
/// Responds 503 when either dependency is unreachable.
pub async fn check<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
) -> (StatusCode, Json<HealthReport>)
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let report = state.health.check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(
            broker = report.broker.connected,
            database = report.database.connected,
            "health check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
