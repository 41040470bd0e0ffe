//! Sink handle, bounded queue and the serial delivery loop

use super::{AttributeMapping, ExportRequest, ExporterBackend};
use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::{SinkDefinition, SinkKind};
use crate::error::DeliveryError;
use crate::gateway::AdmittedBatch;
use crate::health::{components, HealthRegistry};
use crate::models::SignalType;
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::queue::{lock, BoundedQueue, OverflowPolicy, PushOutcome};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

/// Delay before re-checking a breaker that refused a send
const BREAKER_RECHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub name: String,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub mapping: AttributeMapping,
    /// Further restriction over what the backend accepts
    pub signals: Option<Vec<SignalType>>,
    pub shutdown_grace: Duration,
}

impl SinkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_capacity: 1_024,
            overflow: OverflowPolicy::DropNewest,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            mapping: AttributeMapping::default(),
            signals: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn from_definition(definition: &SinkDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            queue_capacity: definition.queue_capacity,
            overflow: definition.overflow,
            retry: definition.retry.to_policy(),
            circuit: definition.circuit.to_breaker_config(),
            mapping: definition.attribute_mapping.clone(),
            signals: definition.signals.clone(),
            shutdown_grace: definition.shutdown_grace(),
        }
    }
}

/// Per-sink delivery accounting, served on the gateway `/stats`
///
/// Once a sink has drained, `delivered + dropped() == offered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStats {
    pub name: String,
    pub kind: SinkKind,
    /// Redelivered batch ids are absorbed downstream; otherwise at-least-once
    #[serde(default)]
    pub dedup: bool,
    pub offered: u64,
    pub enqueued: u64,
    pub delivered: u64,
    pub dropped_queue_full: u64,
    pub dropped_permanent: u64,
    pub dropped_exhausted: u64,
    pub dropped_shutdown: u64,
    pub retries: u64,
    pub queue_depth: usize,
    pub in_flight: bool,
    pub circuit_state: CircuitState,
}

impl SinkStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full
            + self.dropped_permanent
            + self.dropped_exhausted
            + self.dropped_shutdown
    }

    /// Batches delivered or dropped
    pub fn settled(&self) -> u64 {
        self.delivered + self.dropped()
    }

    /// Batches not yet delivered or dropped
    pub fn pending(&self) -> u64 {
        self.queue_depth as u64 + u64::from(self.in_flight)
    }
}

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_permanent: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_shutdown: AtomicU64,
    retries: AtomicU64,
}

struct SinkShared {
    name: String,
    kind: SinkKind,
    dedup: bool,
    queue: Mutex<BoundedQueue<Arc<AdmittedBatch>>>,
    notify: Notify,
    accepting: AtomicBool,
    in_flight: AtomicBool,
    circuit_state: AtomicU8,
    counters: Counters,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl SinkShared {
    fn pop(&self) -> Option<Arc<AdmittedBatch>> {
        let (batch, depth) = {
            let mut queue = lock(&self.queue);
            (queue.pop_front(), queue.len())
        };
        self.metrics.set_sink_queue_depth(&self.name, depth);
        batch
    }

    fn record_drop(&self, batch: &AdmittedBatch, counter: &AtomicU64, reason: &str, attempts: u32) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_sink_batches(&self.name, reason);
        self.logger
            .log_sink_drop(&self.name, &batch.batch.batch_id.to_string(), reason, attempts);
    }
}

fn encode_state(state: CircuitState) -> u8 {
    state.as_gauge() as u8
}

fn decode_state(raw: u8) -> CircuitState {
    match raw {
        1 => CircuitState::HalfOpen,
        2 => CircuitState::Open,
        _ => CircuitState::Closed,
    }
}

/// Cloneable handle the gateway fans batches out to
#[derive(Clone)]
pub struct ExporterSink {
    shared: Arc<SinkShared>,
}

impl std::fmt::Debug for ExporterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterSink")
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

impl ExporterSink {
    /// Create the handle and the worker that must be spawned to drive it
    pub fn new(config: SinkConfig, backend: Arc<dyn ExporterBackend>) -> (Self, SinkWorker) {
        let shared = Arc::new(SinkShared {
            name: config.name.clone(),
            kind: backend.kind(),
            dedup: backend.supports_dedup(),
            queue: Mutex::new(BoundedQueue::new(config.queue_capacity, config.overflow)),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            circuit_state: AtomicU8::new(encode_state(CircuitState::Closed)),
            counters: Counters::default(),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new(format!("sink:{}", config.name)),
        });

        let worker = SinkWorker {
            shared: Arc::clone(&shared),
            circuit: CircuitBreaker::new(config.circuit.clone()),
            backend,
            config,
            current: None,
            health: None,
        };
        (Self { shared }, worker)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> SinkKind {
        self.shared.kind
    }

    /// Offer a batch. Never blocks; returns whether it was queued.
    pub fn enqueue(&self, batch: Arc<AdmittedBatch>) -> bool {
        let shared = &self.shared;
        shared.counters.offered.fetch_add(1, Ordering::Relaxed);

        if !shared.accepting.load(Ordering::Acquire) {
            shared.record_drop(&batch, &shared.counters.dropped_shutdown, "shutdown", 0);
            return false;
        }

        let (pushed, depth) = {
            let mut queue = lock(&shared.queue);
            (queue.push(batch), queue.len())
        };
        shared.metrics.set_sink_queue_depth(&shared.name, depth);

        match pushed {
            PushOutcome::Accepted => {
                shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                shared.notify.notify_one();
                true
            }
            PushOutcome::Evicted(old) => {
                shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                shared.record_drop(&old, &shared.counters.dropped_queue_full, "queue_full", 0);
                shared.notify.notify_one();
                true
            }
            PushOutcome::Rejected(new) => {
                shared.record_drop(&new, &shared.counters.dropped_queue_full, "queue_full", 0);
                false
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    pub fn stats(&self) -> SinkStats {
        let c = &self.shared.counters;
        SinkStats {
            name: self.shared.name.clone(),
            kind: self.shared.kind,
            dedup: self.shared.dedup,
            offered: c.offered.load(Ordering::Relaxed),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped_queue_full: c.dropped_queue_full.load(Ordering::Relaxed),
            dropped_permanent: c.dropped_permanent.load(Ordering::Relaxed),
            dropped_exhausted: c.dropped_exhausted.load(Ordering::Relaxed),
            dropped_shutdown: c.dropped_shutdown.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            queue_depth: self.queue_depth(),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            circuit_state: decode_state(self.shared.circuit_state.load(Ordering::Relaxed)),
        }
    }
}

/// The batch at the head of a sink, held outside the queue while it is tried
struct InFlight {
    batch: Arc<AdmittedBatch>,
    attempts: u32,
    next_eligible: Option<Instant>,
    request: Option<Arc<ExportRequest>>,
}

enum Step {
    Idle,
    Wait(Instant),
    Export(Arc<ExportRequest>),
    /// Settled without a backend call
    Continue,
}

/// Serial delivery loop for one sink
pub struct SinkWorker {
    shared: Arc<SinkShared>,
    backend: Arc<dyn ExporterBackend>,
    config: SinkConfig,
    circuit: CircuitBreaker,
    current: Option<InFlight>,
    health: Option<HealthRegistry>,
}

impl SinkWorker {
    /// Report breaker state into a health registry under `sink.<name>`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Deliver until shutdown is signalled, then drain within the grace period
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SinkStats {
        info!(
            sink = %self.shared.name,
            kind = %self.shared.kind,
            queue_capacity = self.config.queue_capacity,
            "Starting sink delivery loop"
        );

        while !*shutdown.borrow() {
            match self.next_step().await {
                Step::Continue => {}
                Step::Idle => {
                    tokio::select! {
                        _ = self.shared.notify.notified() => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Step::Wait(until) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Step::Export(request) => {
                    let backend = Arc::clone(&self.backend);
                    let started = Instant::now();
                    let result = tokio::select! {
                        result = backend.export(&request) => result,
                        _ = shutdown.changed() => {
                            self.circuit.abandon_probe();
                            break;
                        }
                    };
                    self.settle(result, started).await;
                }
            }
        }

        self.drain().await
    }

    /// Stop accepting, retry what is queued until the grace period ends,
    /// then abandon the rest
    async fn drain(mut self) -> SinkStats {
        self.shared.accepting.store(false, Ordering::Release);
        let grace = self.config.shutdown_grace;

        if tokio::time::timeout(grace, self.deliver_remaining())
            .await
            .is_err()
        {
            debug!(sink = %self.shared.name, "Shutdown grace period elapsed");
        }

        let mut abandoned: Vec<(Arc<AdmittedBatch>, u32)> = self
            .current
            .take()
            .map(|f| (f.batch, f.attempts))
            .into_iter()
            .collect();
        abandoned.extend(lock(&self.shared.queue).drain_all().into_iter().map(|b| (b, 0)));
        for (batch, attempts) in &abandoned {
            self.shared.record_drop(
                batch,
                &self.shared.counters.dropped_shutdown,
                "shutdown",
                *attempts,
            );
        }
        self.shared.in_flight.store(false, Ordering::Relaxed);
        self.shared.metrics.set_sink_queue_depth(&self.shared.name, 0);

        let stats = ExporterSink {
            shared: Arc::clone(&self.shared),
        }
        .stats();
        info!(
            sink = %stats.name,
            delivered = stats.delivered,
            dropped = stats.dropped(),
            abandoned = abandoned.len(),
            "Sink delivery loop stopped"
        );
        stats
    }

    async fn deliver_remaining(&mut self) {
        loop {
            match self.next_step().await {
                Step::Idle => return,
                Step::Continue => {}
                Step::Wait(until) => tokio::time::sleep_until(until).await,
                Step::Export(request) => {
                    let started = Instant::now();
                    let result = self.backend.export(&request).await;
                    self.settle(result, started).await;
                }
            }
        }
    }

    /// Decide what to do with the head batch
    async fn next_step(&mut self) -> Step {
        if self.current.is_none() {
            self.current = self.shared.pop().map(|batch| InFlight {
                batch,
                attempts: 0,
                next_eligible: None,
                request: None,
            });
            self.shared
                .in_flight
                .store(self.current.is_some(), Ordering::Relaxed);
        }
        let Some(flight) = self.current.as_mut() else {
            return Step::Idle;
        };

        let request = Arc::clone(flight.request.get_or_insert_with(|| {
            Arc::new(prepare_request(
                &flight.batch,
                &self.config,
                self.backend.as_ref(),
            ))
        }));
        if request.is_empty() {
            // Nothing this backend stores
            self.complete_delivered();
            return Step::Continue;
        }

        let now = Instant::now();
        if let Some(at) = flight.next_eligible.filter(|at| *at > now) {
            return Step::Wait(at);
        }
        if let Some(at) = self.circuit.retry_at().map(Instant::from_std) {
            if at > now {
                return Step::Wait(at);
            }
        }

        let before = self.circuit.state();
        let allowed = self.circuit.try_acquire(now.into_std());
        self.note_transition(before).await;
        if allowed {
            Step::Export(request)
        } else {
            Step::Wait(now + BREAKER_RECHECK)
        }
    }

    async fn settle(&mut self, result: Result<(), DeliveryError>, started: Instant) {
        self.shared
            .metrics
            .observe_export_latency(&self.shared.name, started.elapsed().as_secs_f64());
        let Some(mut flight) = self.current.take() else {
            return;
        };
        let before = self.circuit.state();

        match result {
            Ok(()) => {
                self.circuit.record_success();
                self.current = Some(flight);
                self.complete_delivered();
            }
            Err(DeliveryError::Permanent(reason)) => {
                // The backend answered; only this payload is bad
                self.circuit.record_success();
                self.shared.record_drop(
                    &flight.batch,
                    &self.shared.counters.dropped_permanent,
                    "permanent",
                    flight.attempts + 1,
                );
                debug!(sink = %self.shared.name, reason = %reason, "Backend rejected batch");
                self.shared.in_flight.store(false, Ordering::Relaxed);
            }
            Err(DeliveryError::Transient(reason)) => {
                let now = Instant::now();
                self.circuit.record_failure(now.into_std());
                flight.attempts += 1;

                if self.config.retry.is_exhausted(flight.attempts) {
                    self.shared.record_drop(
                        &flight.batch,
                        &self.shared.counters.dropped_exhausted,
                        "retries_exhausted",
                        flight.attempts,
                    );
                    self.shared.in_flight.store(false, Ordering::Relaxed);
                } else {
                    let delay = self.config.retry.delay_for(flight.attempts - 1);
                    debug!(
                        sink = %self.shared.name,
                        batch_id = %flight.batch.batch.batch_id,
                        attempts = flight.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Export failed, retrying after backoff"
                    );
                    self.shared.counters.retries.fetch_add(1, Ordering::Relaxed);
                    flight.next_eligible = Some(now + delay);
                    self.current = Some(flight);
                }
            }
        }

        self.note_transition(before).await;
    }

    fn complete_delivered(&mut self) {
        if self.current.take().is_some() {
            self.shared
                .counters
                .delivered
                .fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.inc_sink_batches(&self.shared.name, "delivered");
        }
        self.shared.in_flight.store(false, Ordering::Relaxed);
    }

    async fn note_transition(&self, before: CircuitState) {
        let after = self.circuit.state();
        if before == after {
            return;
        }
        self.shared
            .circuit_state
            .store(encode_state(after), Ordering::Relaxed);
        self.shared.logger.log_circuit_transition(
            &format!("sink:{}", self.shared.name),
            before,
            after,
        );
        self.shared
            .metrics
            .set_circuit_state("sink", &self.shared.name, after);
        if let Some(health) = &self.health {
            health
                .set_circuit(&components::sink(&self.shared.name), after)
                .await;
        }
    }
}

/// Filter to the signal types this sink takes and apply its attribute mapping
fn prepare_request(
    admitted: &AdmittedBatch,
    config: &SinkConfig,
    backend: &dyn ExporterBackend,
) -> ExportRequest {
    let batch = &admitted.batch;
    let records = batch
        .records
        .iter()
        .filter(|record| {
            let signal = record.signal_type();
            backend.accepts(signal)
                && config
                    .signals
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(&signal))
        })
        .map(|record| config.mapping.apply(record))
        .collect();

    ExportRequest {
        batch_id: batch.batch_id,
        agent_id: batch.agent_id.clone(),
        sequence: batch.sequence,
        records,
    }
}
