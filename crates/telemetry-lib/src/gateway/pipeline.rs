use crate::backpressure::{AdmissionLease, BackpressureController};
use crate::error::AdmissionError;
use crate::health::{components, HealthRegistry};
use crate::models::{attributes, Batch, BatchId, SignalRecord};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::proto::{decode_batch, DecodedBatch};
use crate::queue::lock;
use crate::sink::{ExporterSink, SinkStats};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Admitted bytes above this share of the ceiling degrade health
const PRESSURE_WARN_RATIO: f64 = 0.9;

/// Deadline used when `max_retention` does not fit on the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A normalized batch shared by every sink queue.
///
/// Holds the admission lease; the bytes go back to the controller when the
/// last sink drops its reference, or earlier if the reaper forces it.
#[derive(Debug)]
pub struct AdmittedBatch {
    pub batch: Batch,
    lease: Option<AdmissionLease>,
}

impl AdmittedBatch {
    /// A batch that holds no admission budget
    pub fn unaccounted(batch: Batch) -> Self {
        Self { batch, lease: None }
    }

    fn leased(batch: Batch, lease: AdmissionLease) -> Self {
        Self {
            batch,
            lease: Some(lease),
        }
    }

    pub fn admitted_bytes(&self) -> u64 {
        self.lease.as_ref().map_or(0, AdmissionLease::size)
    }

    /// Release the admission budget now. False if it was already released.
    pub fn force_release(&self) -> bool {
        self.lease.as_ref().is_some_and(AdmissionLease::release)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Attributes every record must carry to pass normalization
    pub required_attributes: Vec<String>,
    /// Longest a batch may hold admission budget
    pub max_retention: Duration,
    pub reap_interval: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            required_attributes: vec![attributes::CLUSTER_NAME.to_string()],
            max_retention: Duration::from_secs(300),
            reap_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of one accepted push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReport {
    pub batch_id: BatchId,
    pub accepted_records: usize,
    pub invalid_records: usize,
    pub admitted_bytes: u64,
    pub sinks_offered: usize,
    pub sinks_accepted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    pub batches_admitted: u64,
    pub batches_rejected: u64,
    pub batches_malformed: u64,
    pub records_accepted: u64,
    pub records_invalid: u64,
    pub admitted_bytes: u64,
    pub ceiling_bytes: u64,
    pub retained_batches: usize,
    pub force_released: u64,
    pub sinks: Vec<SinkStats>,
}

#[derive(Debug)]
struct Retained {
    deadline: Instant,
    batch: Weak<AdmittedBatch>,
}

fn retention_deadline(now: Instant, retention: Duration) -> Instant {
    now.checked_add(retention).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug, Default)]
struct Counters {
    batches_admitted: AtomicU64,
    batches_rejected: AtomicU64,
    batches_malformed: AtomicU64,
    records_accepted: AtomicU64,
    records_invalid: AtomicU64,
    force_released: AtomicU64,
}

/// Concurrent entry point for pushed batches. `submit` never waits on a sink.
pub struct GatewayPipeline {
    controller: Arc<BackpressureController>,
    sinks: Vec<ExporterSink>,
    options: GatewayOptions,
    retained: Mutex<VecDeque<Retained>>,
    counters: Counters,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl GatewayPipeline {
    pub fn new(
        controller: Arc<BackpressureController>,
        sinks: Vec<ExporterSink>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            controller,
            sinks,
            options,
            retained: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("gateway"),
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn sinks(&self) -> &[ExporterSink] {
        &self.sinks
    }

    pub fn controller(&self) -> &Arc<BackpressureController> {
        &self.controller
    }

    /// Decode a pushed body and submit it
    pub fn submit_bytes(&self, body: &[u8]) -> Result<SubmitReport, AdmissionError> {
        match decode_batch(body) {
            Ok(decoded) => self.submit_decoded(decoded),
            Err(err) => {
                self.counters
                    .batches_malformed
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_gateway_batches("malformed");
                self.logger.log_batch_rejected("unknown", "unknown", &err.to_string());
                Err(err)
            }
        }
    }

    pub fn submit_decoded(&self, decoded: DecodedBatch) -> Result<SubmitReport, AdmissionError> {
        let mut report = self.submit(decoded.batch)?;
        if decoded.malformed_records > 0 {
            self.count_invalid(decoded.malformed_records, "malformed");
            report.invalid_records += decoded.malformed_records;
        }
        Ok(report)
    }

    /// Admit, normalize and fan out one batch
    pub fn submit(&self, mut batch: Batch) -> Result<SubmitReport, AdmissionError> {
        let size = batch.estimated_size() as u64;
        let Some(lease) = self.controller.admit(size) else {
            self.counters
                .batches_rejected
                .fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_gateway_batches("rejected");
            let err = AdmissionError::Capacity {
                requested: size,
                ceiling: self.controller.ceiling(),
            };
            self.logger.log_batch_rejected(
                &batch.agent_id,
                &batch.batch_id.to_string(),
                &err.to_string(),
            );
            return Err(err);
        };
        self.counters
            .batches_admitted
            .fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_gateway_batches("admitted");
        self.metrics
            .set_admitted_bytes(self.controller.admitted_bytes());

        let before = batch.records.len();
        let required = &self.options.required_attributes;
        batch
            .records
            .retain(|record| has_required(record, required));
        let invalid = before - batch.records.len();
        if invalid > 0 {
            self.count_invalid(invalid, "missing_attribute");
            debug!(
                agent_id = %batch.agent_id,
                batch_id = %batch.batch_id,
                invalid,
                "Dropped records missing required attributes"
            );
        }
        self.counters
            .records_accepted
            .fetch_add(batch.records.len() as u64, Ordering::Relaxed);

        let batch_id = batch.batch_id;
        let accepted_records = batch.records.len();
        let admitted = Arc::new(AdmittedBatch::leased(batch, lease));

        lock(&self.retained).push_back(Retained {
            deadline: retention_deadline(Instant::now(), self.options.max_retention),
            batch: Arc::downgrade(&admitted),
        });

        let sinks_accepted = self
            .sinks
            .iter()
            .filter(|sink| sink.enqueue(Arc::clone(&admitted)))
            .count();

        Ok(SubmitReport {
            batch_id,
            accepted_records,
            invalid_records: invalid,
            admitted_bytes: size,
            sinks_offered: self.sinks.len(),
            sinks_accepted,
        })
    }

    fn count_invalid(&self, count: usize, reason: &str) {
        self.counters
            .records_invalid
            .fetch_add(count as u64, Ordering::Relaxed);
        self.metrics
            .inc_records_dropped("gateway", reason, count as u64);
    }

    /// Force-release every batch past its retention deadline and forget
    /// batches already released by their sinks. Returns the forced count.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let mut forced = 0;
        {
            let mut retained = lock(&self.retained);
            while retained.front().is_some_and(|r| r.deadline <= now) {
                let Some(entry) = retained.pop_front() else {
                    break;
                };
                if let Some(batch) = entry.batch.upgrade() {
                    if batch.force_release() {
                        forced += 1;
                        warn!(
                            batch_id = %batch.batch.batch_id,
                            agent_id = %batch.batch.agent_id,
                            "Force-released batch past retention deadline"
                        );
                    }
                }
            }
            retained.retain(|r| r.batch.strong_count() > 0);
        }

        if forced > 0 {
            self.counters
                .force_released
                .fetch_add(forced as u64, Ordering::Relaxed);
            self.metrics.inc_force_released(forced as u64);
        }
        self.metrics
            .set_admitted_bytes(self.controller.admitted_bytes());
        forced
    }

    /// Reap on an interval until shutdown and keep backpressure health current
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.reap_interval);
        info!(
            max_retention_secs = self.options.max_retention.as_secs(),
            "Starting retention reaper"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_expired(Instant::now());
                    self.report_pressure().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Retention reaper stopped");
    }

    async fn report_pressure(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let ceiling = self.controller.ceiling().max(1) as f64;
        let ratio = self.controller.admitted_bytes() as f64 / ceiling;
        if ratio >= PRESSURE_WARN_RATIO {
            health
                .set_degraded(
                    components::BACKPRESSURE,
                    format!("admitted bytes at {:.0}% of ceiling", ratio * 100.0),
                )
                .await;
        } else {
            health.set_healthy(components::BACKPRESSURE).await;
        }
    }

    pub fn stats(&self) -> GatewayStats {
        let c = &self.counters;
        GatewayStats {
            batches_admitted: c.batches_admitted.load(Ordering::Relaxed),
            batches_rejected: c.batches_rejected.load(Ordering::Relaxed),
            batches_malformed: c.batches_malformed.load(Ordering::Relaxed),
            records_accepted: c.records_accepted.load(Ordering::Relaxed),
            records_invalid: c.records_invalid.load(Ordering::Relaxed),
            admitted_bytes: self.controller.admitted_bytes(),
            ceiling_bytes: self.controller.ceiling(),
            retained_batches: lock(&self.retained)
                .iter()
                .filter(|r| r.batch.strong_count() > 0)
                .count(),
            force_released: c.force_released.load(Ordering::Relaxed),
            sinks: self.sinks.iter().map(ExporterSink::stats).collect(),
        }
    }
}

fn has_required(record: &SignalRecord, required: &[String]) -> bool {
    required
        .iter()
        .all(|key| record.attribute(key).is_some_and(|v| !v.is_empty()))
}
