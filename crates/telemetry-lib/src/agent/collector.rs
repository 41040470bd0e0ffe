//! Ring buffer, batch assembly and hub delivery for one edge cluster

use super::transport::HubTransport;
use crate::circuit::{clock_now, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::DeliveryError;
use crate::health::{components, HealthRegistry};
use crate::models::{Batch, SignalRecord};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::queue::{lock, BoundedQueue, OverflowPolicy, PushOutcome};
use crate::tagger::ResourceTagger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Configuration for the agent collector
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifies this agent in batches pushed to the hub
    pub agent_id: String,
    /// Ring buffer capacity in records (B)
    pub buffer_capacity: usize,
    /// Buffered record count that triggers an early flush
    pub high_water_mark: usize,
    /// What a full ring buffer does with new records
    pub overflow_policy: OverflowPolicy,
    pub flush_interval: Duration,
    /// Assembled batches held while the hub is unreachable
    pub outbound_capacity: usize,
    pub circuit: CircuitBreakerConfig,
    /// Bound on the final flush at shutdown
    pub shutdown_deadline: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "telemetry-agent".to_string(),
            buffer_capacity: 10_000,
            high_water_mark: 8_000,
            overflow_policy: OverflowPolicy::DropOldest,
            flush_interval: Duration::from_secs(1),
            outbound_capacity: 64,
            circuit: CircuitBreakerConfig::default(),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}

/// Result of ingesting one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Accepted, and the oldest buffered record was dropped to make room
    Evicted,
    /// Buffer full under the drop-newest policy; the caller may retry
    Rejected,
}

/// Per-call summary for multi-record ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub evicted: usize,
    pub rejected: usize,
}

impl IngestSummary {
    fn add(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Accepted => self.accepted += 1,
            IngestOutcome::Evicted => {
                self.accepted += 1;
                self.evicted += 1;
            }
            IngestOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// Outcome of one delivery pass over the outbound queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub dropped: usize,
    pub failed: usize,
    /// The breaker refused to send
    pub suppressed: bool,
}

/// Snapshot of agent counters, served on `/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub ingested: u64,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub outbound_batches: usize,
    pub dropped_overflow: u64,
    pub rejected: u64,
    pub batches_assembled: u64,
    pub batches_sent: u64,
    pub batches_dropped: u64,
    pub records_sent: u64,
    pub records_dropped_outbound: u64,
    pub records_discarded_on_shutdown: u64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub last_flush: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    ingested: AtomicU64,
    dropped_overflow: AtomicU64,
    rejected: AtomicU64,
    batches_assembled: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
    records_sent: AtomicU64,
    records_dropped_outbound: AtomicU64,
    records_discarded_on_shutdown: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Agent collector for one edge cluster
///
/// Shared by reference between the ingestion endpoint and the flush loop.
/// Every queue operation is a short critical section; only the hub send
/// suspends.
pub struct AgentCollector {
    config: AgentConfig,
    tagger: ResourceTagger,
    buffer: Mutex<BoundedQueue<SignalRecord>>,
    outbound: Mutex<BoundedQueue<Arc<Batch>>>,
    circuit: Mutex<CircuitBreaker>,
    sequence: AtomicU64,
    counters: Counters,
    last_flush: Mutex<Option<DateTime<Utc>>>,
    high_water: Notify,
    /// Serializes delivery passes so batches leave in assembly order
    delivery: tokio::sync::Mutex<()>,
    health: Option<HealthRegistry>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

/// Releases a granted probe if the send is cancelled before it settles,
/// so a dropped delivery pass cannot leave the breaker refusing forever
struct ProbeGuard<'a> {
    circuit: Option<&'a Mutex<CircuitBreaker>>,
}

impl<'a> ProbeGuard<'a> {
    fn armed(circuit: &'a Mutex<CircuitBreaker>) -> Self {
        Self {
            circuit: Some(circuit),
        }
    }

    fn settled(mut self) {
        self.circuit = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(circuit) = self.circuit.take() {
            lock(circuit).abandon_probe();
        }
    }
}

impl AgentCollector {
    pub fn new(config: AgentConfig, tagger: ResourceTagger) -> Self {
        let high_water_mark = config.high_water_mark.clamp(1, config.buffer_capacity.max(1));
        Self {
            buffer: Mutex::new(BoundedQueue::new(
                config.buffer_capacity,
                config.overflow_policy,
            )),
            outbound: Mutex::new(BoundedQueue::new(
                config.outbound_capacity,
                OverflowPolicy::DropOldest,
            )),
            circuit: Mutex::new(CircuitBreaker::new(config.circuit.clone())),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
            last_flush: Mutex::new(None),
            high_water: Notify::new(),
            delivery: tokio::sync::Mutex::new(()),
            health: None,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new(format!("agent:{}", config.agent_id)),
            config: AgentConfig {
                high_water_mark,
                ..config
            },
            tagger,
        }
    }

    /// Report hub link state into a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tagger(&self) -> &ResourceTagger {
        &self.tagger
    }

    /// Tag and buffer one record. Never blocks.
    pub fn ingest(&self, record: SignalRecord) -> IngestOutcome {
        let tagged = self.tagger.tag(record);
        let (pushed, above_high_water) = {
            let mut buffer = lock(&self.buffer);
            let pushed = buffer.push(tagged);
            (pushed, buffer.is_above(self.config.high_water_mark))
        };

        let outcome = match pushed {
            PushOutcome::Accepted => {
                bump(&self.counters.ingested, 1);
                IngestOutcome::Accepted
            }
            PushOutcome::Evicted(_) => {
                bump(&self.counters.ingested, 1);
                bump(&self.counters.dropped_overflow, 1);
                self.metrics.inc_records_dropped("agent", "buffer_overflow", 1);
                IngestOutcome::Evicted
            }
            PushOutcome::Rejected(_) => {
                bump(&self.counters.rejected, 1);
                self.metrics.inc_records_dropped("agent", "buffer_full", 1);
                IngestOutcome::Rejected
            }
        };

        if outcome != IngestOutcome::Rejected {
            self.metrics.inc_records_ingested(1);
        }
        if above_high_water {
            self.high_water.notify_one();
        }
        outcome
    }

    pub fn ingest_many(&self, records: impl IntoIterator<Item = SignalRecord>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for record in records {
            summary.add(self.ingest(record));
        }
        summary
    }

    /// Drain the ring buffer into one batch and queue it for delivery.
    /// Returns `None` when nothing was buffered.
    pub fn assemble_batch(&self) -> Option<Arc<Batch>> {
        let records = lock(&self.buffer).drain_all();
        if records.is_empty() {
            return None;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let batch = Arc::new(Batch::new(self.config.agent_id.clone(), sequence, records));
        bump(&self.counters.batches_assembled, 1);

        let pushed = lock(&self.outbound).push(Arc::clone(&batch));
        match pushed {
            PushOutcome::Accepted => {}
            PushOutcome::Evicted(old) | PushOutcome::Rejected(old) => {
                self.count_dropped_batch(&old, "outbound_overflow");
                warn!(
                    batch_id = %old.batch_id,
                    sequence = old.sequence,
                    records = old.len(),
                    "Outbound queue full, dropped oldest batch"
                );
            }
        }

        debug!(
            batch_id = %batch.batch_id,
            sequence,
            records = batch.len(),
            "Assembled batch"
        );
        self.refresh_gauges();
        Some(batch)
    }

    /// Push queued batches to the hub in assembly order while the breaker allows.
    ///
    /// A batch leaves the queue only after a definitive answer: success, or a
    /// permanent rejection. A transient failure keeps it at the head.
    pub async fn deliver_pending(&self, transport: &dyn HubTransport) -> DeliveryReport {
        let _serial = self.delivery.lock().await;
        let mut report = DeliveryReport::default();

        loop {
            let Some(batch) = lock(&self.outbound).front().cloned() else {
                break;
            };

            let (allowed, change) = self.with_circuit(|c| c.try_acquire(clock_now()));
            self.note_transition(change).await;
            if !allowed {
                report.suppressed = true;
                break;
            }

            let probe = ProbeGuard::armed(&self.circuit);
            let sent = transport.send(&batch).await;
            probe.settled();

            match sent {
                Ok(()) => {
                    self.remove_if_front(&batch);
                    let (_, change) = self.with_circuit(|c| c.record_success());
                    self.note_transition(change).await;

                    bump(&self.counters.batches_sent, 1);
                    bump(&self.counters.records_sent, batch.len() as u64);
                    self.metrics.inc_agent_batches("sent");
                    *lock(&self.last_flush) = Some(Utc::now());
                    report.sent += 1;
                }
                Err(DeliveryError::Permanent(reason)) => {
                    // The hub answered, so the link itself is healthy
                    self.remove_if_front(&batch);
                    let (_, change) = self.with_circuit(|c| c.record_success());
                    self.note_transition(change).await;

                    self.count_dropped_batch(&batch, "rejected_by_hub");
                    warn!(
                        batch_id = %batch.batch_id,
                        sequence = batch.sequence,
                        reason = %reason,
                        "Hub rejected batch permanently, dropping"
                    );
                    report.dropped += 1;
                }
                Err(DeliveryError::Transient(reason)) => {
                    let (_, change) = self.with_circuit(|c| c.record_failure(clock_now()));
                    self.note_transition(change).await;

                    self.metrics.inc_agent_batches("failed");
                    warn!(
                        batch_id = %batch.batch_id,
                        sequence = batch.sequence,
                        error = %reason,
                        "Hub push failed, batch kept for retry"
                    );
                    report.failed += 1;
                    break;
                }
            }
        }

        self.refresh_gauges();
        report
    }

    /// One flush cycle: assemble whatever is buffered, then deliver
    pub async fn flush(&self, transport: &dyn HubTransport) -> DeliveryReport {
        self.assemble_batch();
        self.deliver_pending(transport).await
    }

    /// Flush loop: on every interval tick or high-water notification, until
    /// shutdown is signalled. Finishes with the bounded final flush.
    pub async fn run(
        self: Arc<Self>,
        transport: Arc<dyn HubTransport>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AgentStats {
        info!(
            agent_id = %self.config.agent_id,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            buffer_capacity = self.config.buffer_capacity,
            "Starting agent flush loop"
        );

        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.high_water.notified() => {
                    debug!("Buffer reached high-water mark, flushing early");
                }
                _ = shutdown.changed() => break,
            }

            // An interrupted send leaves its batch queued for the final flush
            tokio::select! {
                _ = self.flush(transport.as_ref()) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.shutdown(transport.as_ref()).await
    }

    /// Final flush bounded by the shutdown deadline; whatever is left is discarded
    pub async fn shutdown(&self, transport: &dyn HubTransport) -> AgentStats {
        let deadline = self.config.shutdown_deadline;
        match tokio::time::timeout(deadline, self.flush(transport)).await {
            Ok(report) => debug!(sent = report.sent, "Final flush finished"),
            Err(_) => warn!(
                deadline_ms = deadline.as_millis() as u64,
                "Final flush exceeded shutdown deadline"
            ),
        }

        let buffered = lock(&self.buffer).drain_all().len();
        let batches = lock(&self.outbound).drain_all();
        let batch_records: usize = batches.iter().map(|b| b.len()).sum();
        let discarded = (buffered + batch_records) as u64;

        bump(&self.counters.records_discarded_on_shutdown, discarded);
        if discarded > 0 {
            self.metrics
                .inc_records_dropped("agent", "shutdown", discarded);
        }
        self.logger
            .log_shutdown_discard(buffered + batch_records, batches.len());
        self.refresh_gauges();
        self.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        lock(&self.circuit).state()
    }

    pub fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn outbound_len(&self) -> usize {
        lock(&self.outbound).len()
    }

    pub fn stats(&self) -> AgentStats {
        let c = &self.counters;
        let (circuit_state, consecutive_failures) = {
            let circuit = lock(&self.circuit);
            (circuit.state(), circuit.consecutive_failures())
        };

        AgentStats {
            agent_id: self.config.agent_id.clone(),
            ingested: c.ingested.load(Ordering::Relaxed),
            buffered: self.buffered(),
            buffer_capacity: self.config.buffer_capacity,
            outbound_batches: self.outbound_len(),
            dropped_overflow: c.dropped_overflow.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            batches_assembled: c.batches_assembled.load(Ordering::Relaxed),
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            batches_dropped: c.batches_dropped.load(Ordering::Relaxed),
            records_sent: c.records_sent.load(Ordering::Relaxed),
            records_dropped_outbound: c.records_dropped_outbound.load(Ordering::Relaxed),
            records_discarded_on_shutdown: c.records_discarded_on_shutdown.load(Ordering::Relaxed),
            circuit_state,
            consecutive_failures,
            last_flush: *lock(&self.last_flush),
        }
    }

    /// Run `f` against the breaker and report a state change, if any
    fn with_circuit<R>(
        &self,
        f: impl FnOnce(&mut CircuitBreaker) -> R,
    ) -> (R, Option<(CircuitState, CircuitState)>) {
        let mut circuit = lock(&self.circuit);
        let before = circuit.state();
        let result = f(&mut circuit);
        let after = circuit.state();
        (result, (before != after).then_some((before, after)))
    }

    async fn note_transition(&self, change: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = change else {
            return;
        };
        self.logger.log_circuit_transition("hub", from, to);
        self.metrics
            .set_circuit_state("agent", &self.config.agent_id, to);
        if let Some(health) = &self.health {
            health.set_circuit(components::HUB_LINK, to).await;
        }
    }

    fn remove_if_front(&self, batch: &Batch) {
        let mut outbound = lock(&self.outbound);
        if outbound
            .front()
            .is_some_and(|front| front.batch_id == batch.batch_id)
        {
            outbound.pop_front();
        }
    }

    fn count_dropped_batch(&self, batch: &Batch, reason: &str) {
        bump(&self.counters.batches_dropped, 1);
        bump(&self.counters.records_dropped_outbound, batch.len() as u64);
        self.metrics.inc_agent_batches("dropped");
        self.metrics
            .inc_records_dropped("agent", reason, batch.len() as u64);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .set_agent_buffer(self.buffered(), self.outbound_len());
    }
}
