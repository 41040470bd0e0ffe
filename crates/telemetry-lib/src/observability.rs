//! Observability infrastructure for the telemetry pipeline
//!
//! Provides:
//! - Prometheus metrics for the pipeline's own operation (admitted bytes,
//!   per-sink queue depth and drops, circuit states, agent buffer)
//! - Structured JSON logging events with tracing

use crate::circuit::CircuitState;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for export latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    records_ingested: IntCounter,
    records_dropped: IntCounterVec,
    agent_buffer_records: IntGauge,
    agent_outbound_batches: IntGauge,
    agent_batches: IntCounterVec,
    circuit_state: IntGaugeVec,
    gateway_admitted_bytes: IntGauge,
    gateway_batches: IntCounterVec,
    gateway_force_released: IntCounter,
    sink_queue_depth: IntGaugeVec,
    sink_batches: IntCounterVec,
    sink_export_seconds: HistogramVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            records_ingested: register_int_counter!(
                "telemetry_records_ingested_total",
                "Records accepted by the agent ingestion endpoint"
            )
            .expect("Failed to register records_ingested"),

            records_dropped: register_int_counter_vec!(
                "telemetry_records_dropped_total",
                "Records dropped before delivery, by pipeline stage and reason",
                &["stage", "reason"]
            )
            .expect("Failed to register records_dropped"),

            agent_buffer_records: register_int_gauge!(
                "telemetry_agent_buffer_records",
                "Records waiting in the agent ring buffer"
            )
            .expect("Failed to register agent_buffer_records"),

            agent_outbound_batches: register_int_gauge!(
                "telemetry_agent_outbound_batches",
                "Assembled batches waiting to be pushed to the hub"
            )
            .expect("Failed to register agent_outbound_batches"),

            agent_batches: register_int_counter_vec!(
                "telemetry_agent_batches_total",
                "Agent batch outcomes toward the hub",
                &["outcome"]
            )
            .expect("Failed to register agent_batches"),

            circuit_state: register_int_gauge_vec!(
                "telemetry_circuit_state",
                "Circuit breaker state (0 closed, 1 half-open, 2 open)",
                &["scope", "name"]
            )
            .expect("Failed to register circuit_state"),

            gateway_admitted_bytes: register_int_gauge!(
                "telemetry_gateway_admitted_bytes",
                "Bytes admitted by the gateway and not yet released"
            )
            .expect("Failed to register gateway_admitted_bytes"),

            gateway_batches: register_int_counter_vec!(
                "telemetry_gateway_batches_total",
                "Gateway admission outcomes",
                &["outcome"]
            )
            .expect("Failed to register gateway_batches"),

            gateway_force_released: register_int_counter!(
                "telemetry_gateway_force_released_total",
                "Admissions force-released after the retention deadline"
            )
            .expect("Failed to register gateway_force_released"),

            sink_queue_depth: register_int_gauge_vec!(
                "telemetry_sink_queue_depth",
                "Batches queued per exporter sink",
                &["sink"]
            )
            .expect("Failed to register sink_queue_depth"),

            sink_batches: register_int_counter_vec!(
                "telemetry_sink_batches_total",
                "Exporter sink batch outcomes",
                &["sink", "outcome"]
            )
            .expect("Failed to register sink_batches"),

            sink_export_seconds: register_histogram_vec!(
                "telemetry_sink_export_duration_seconds",
                "Time spent in a single backend export call",
                &["sink"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sink_export_seconds"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PipelineMetrics")
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn inc_records_ingested(&self, count: u64) {
        self.inner().records_ingested.inc_by(count);
    }

    pub fn inc_records_dropped(&self, stage: &str, reason: &str, count: u64) {
        self.inner()
            .records_dropped
            .with_label_values(&[stage, reason])
            .inc_by(count);
    }

    pub fn set_agent_buffer(&self, records: usize, outbound_batches: usize) {
        self.inner().agent_buffer_records.set(records as i64);
        self.inner().agent_outbound_batches.set(outbound_batches as i64);
    }

    pub fn inc_agent_batches(&self, outcome: &str) {
        self.inner()
            .agent_batches
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_circuit_state(&self, scope: &str, name: &str, state: CircuitState) {
        self.inner()
            .circuit_state
            .with_label_values(&[scope, name])
            .set(state.as_gauge());
    }

    pub fn set_admitted_bytes(&self, bytes: u64) {
        self.inner().gateway_admitted_bytes.set(bytes as i64);
    }

    pub fn inc_gateway_batches(&self, outcome: &str) {
        self.inner()
            .gateway_batches
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_force_released(&self, count: u64) {
        self.inner().gateway_force_released.inc_by(count);
    }

    pub fn set_sink_queue_depth(&self, sink: &str, depth: usize) {
        self.inner()
            .sink_queue_depth
            .with_label_values(&[sink])
            .set(depth as i64);
    }

    pub fn inc_sink_batches(&self, sink: &str, outcome: &str) {
        self.inner()
            .sink_batches
            .with_label_values(&[sink, outcome])
            .inc();
    }

    pub fn observe_export_latency(&self, sink: &str, duration_secs: f64) {
        self.inner()
            .sink_export_seconds
            .with_label_values(&[sink])
            .observe(duration_secs);
    }
}

/// Structured logger for pipeline events
///
/// Emits consistently named events so operators can alert on them
/// without parsing free-form messages.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str, cluster: &str) {
        info!(
            event = "process_started",
            component = %self.component,
            version = %version,
            cluster = %cluster,
            "Telemetry process started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "process_shutdown",
            component = %self.component,
            reason = %reason,
            "Telemetry process shutting down"
        );
    }

    pub fn log_circuit_transition(&self, target: &str, from: CircuitState, to: CircuitState) {
        if to == CircuitState::Open {
            warn!(
                event = "circuit_transition",
                component = %self.component,
                target = %target,
                from = %from,
                to = %to,
                "Circuit opened, suppressing sends"
            );
        } else {
            info!(
                event = "circuit_transition",
                component = %self.component,
                target = %target,
                from = %from,
                to = %to,
                "Circuit state changed"
            );
        }
    }

    pub fn log_batch_rejected(&self, agent_id: &str, batch_id: &str, reason: &str) {
        warn!(
            event = "batch_rejected",
            component = %self.component,
            agent_id = %agent_id,
            batch_id = %batch_id,
            reason = %reason,
            "Batch rejected at admission"
        );
    }

    pub fn log_sink_drop(&self, sink: &str, batch_id: &str, reason: &str, attempts: u32) {
        warn!(
            event = "sink_drop",
            component = %self.component,
            sink = %sink,
            batch_id = %batch_id,
            reason = %reason,
            attempts = attempts,
            "Exporter sink dropped batch"
        );
    }

    pub fn log_shutdown_discard(&self, records: usize, batches: usize) {
        if records == 0 && batches == 0 {
            info!(
                event = "shutdown_flush",
                component = %self.component,
                "Final flush complete, nothing discarded"
            );
        } else {
            warn!(
                event = "shutdown_flush",
                component = %self.component,
                discarded_records = records,
                discarded_batches = batches,
                "Final flush incomplete, discarding undelivered telemetry"
            );
        }
    }
}
