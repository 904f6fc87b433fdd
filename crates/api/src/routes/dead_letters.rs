//! Operator view of dead-lettered jobs.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use pipeline::PipelineError;
use queue::QueueClient;
use serde::Deserialize;
use store::{DeadLetterRecord, FulfillmentStore};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// GET /dead-letters?limit=N: most recent entries first.
#[tracing::instrument(skip(state))]
pub async fn list<S, Q>(
    State(state): State<Arc<AppState<S, Q>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeadLetterRecord>>, ApiError>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let records = state
        .store
        .list_dead_letters(limit)
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(records))
}
