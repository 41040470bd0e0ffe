//! Gateway batch-push API

use super::{healthz, metrics, readyz, ErrorBody};
use crate::error::AdmissionError;
use crate::gateway::{GatewayPipeline, GatewayStats, SubmitReport};
use crate::health::HealthRegistry;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRef, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Largest accepted push body
pub const MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Seconds an agent is told to wait after a capacity rejection
const RETRY_AFTER_SECS: &str = "1";

#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<GatewayPipeline>,
    pub health: HealthRegistry,
}

impl GatewayState {
    pub fn new(pipeline: Arc<GatewayPipeline>, health: HealthRegistry) -> Self {
        Self { pipeline, health }
    }
}

impl FromRef<GatewayState> for HealthRegistry {
    fn from_ref(state: &GatewayState) -> Self {
        state.health.clone()
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
            retryable: self.is_retryable(),
        });
        match self {
            AdmissionError::Capacity { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                body,
            )
                .into_response(),
            AdmissionError::Malformed(_) => (StatusCode::BAD_REQUEST, body).into_response(),
        }
    }
}

/// Accept one protobuf-encoded batch
async fn push_batch(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<SubmitReport>, AdmissionError> {
    state.pipeline.submit_bytes(&body).map(Json)
}

async fn stats(State(state): State<GatewayState>) -> Json<GatewayStats> {
    Json(state.pipeline.stats())
}

pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/batches", post(push_batch))
        .route("/stats", get(stats))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES))
        .with_state(state)
}
