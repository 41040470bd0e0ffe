//! Agent ingestion API

use super::{healthz, metrics, readyz};
use crate::agent::{AgentCollector, AgentStats, IngestSummary};
use crate::health::HealthRegistry;
use crate::models::SignalRecord;
use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AgentState {
    pub collector: Arc<AgentCollector>,
    pub health: HealthRegistry,
}

impl AgentState {
    pub fn new(collector: Arc<AgentCollector>, health: HealthRegistry) -> Self {
        Self { collector, health }
    }
}

impl FromRef<AgentState> for HealthRegistry {
    fn from_ref(state: &AgentState) -> Self {
        state.health.clone()
    }
}

/// One record or a list of records
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestBody {
    Many(Vec<SignalRecord>),
    One(Box<SignalRecord>),
}

impl IngestBody {
    fn into_records(self) -> Vec<SignalRecord> {
        match self {
            IngestBody::Many(records) => records,
            IngestBody::One(record) => vec![*record],
        }
    }
}

/// Buffer records and return at once. 503 if any record was refused.
async fn ingest(
    State(state): State<AgentState>,
    Json(body): Json<IngestBody>,
) -> (StatusCode, Json<IngestSummary>) {
    let summary = state.collector.ingest_many(body.into_records());
    if summary.rejected > 0 {
        debug!(rejected = summary.rejected, "Buffer full, records refused");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(summary));
    }
    (StatusCode::ACCEPTED, Json(summary))
}

async fn stats(State(state): State<AgentState>) -> Json<AgentStats> {
    Json(state.collector.stats())
}

pub fn create_router(state: AgentState) -> Router {
    Router::new()
        .route("/v1/records", post(ingest))
        .route("/stats", get(stats))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}
