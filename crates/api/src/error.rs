//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pipeline::PipelineError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Pipeline operation error.
    Pipeline(PipelineError),
    /// Internal server error.
    Internal(String),
}

impl ApiError {
    /// Returns true if the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Pipeline(err) if err.is_transient())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Pipeline(err) => pipeline_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn pipeline_error_to_response(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::InvalidJob(_) => StatusCode::BAD_REQUEST,
        PipelineError::OrderNotFound(_) | PipelineError::SubOrderNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        PipelineError::InvalidTransition(_)
        | PipelineError::OrderNotConfirmed { .. }
        | PipelineError::Conflict(_) => StatusCode::CONFLICT,
        e if e.is_transient() => {
            tracing::warn!(error = %e, "dependency unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
        e => {
            tracing::error!(error = %e, "pipeline error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}
