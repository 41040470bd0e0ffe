//! In-process backend for tests and dry runs, bounded to recent batches

use super::{ExportRequest, ExporterBackend};
use crate::config::SinkKind;
use crate::error::DeliveryError;
use crate::models::{BatchId, SignalRecord, SignalType};
use crate::queue::lock;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Batches kept before the oldest is evicted
pub const DEFAULT_RETAINED_BATCHES: usize = 10_000;

#[derive(Debug, Default)]
struct Store {
    batches: VecDeque<(BatchId, Vec<SignalRecord>)>,
    seen: HashSet<BatchId>,
    seen_order: VecDeque<BatchId>,
}

impl Store {
    fn push(&mut self, batch_id: BatchId, records: Vec<SignalRecord>, limit: usize) {
        if self.batches.len() == limit {
            self.batches.pop_front();
        }
        self.batches.push_back((batch_id, records));
    }

    /// False when the id is already inside the dedup window
    fn remember(&mut self, batch_id: BatchId, limit: usize) -> bool {
        if !self.seen.insert(batch_id) {
            return false;
        }
        self.seen_order.push_back(batch_id);
        if self.seen_order.len() > limit {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Keeps the most recent exported batches in memory. With `dedup`, a batch
/// id seen among the last `retained` ids is acknowledged without storing a
/// second copy.
#[derive(Debug)]
pub struct MemoryBackend {
    dedup: bool,
    retained: usize,
    accepted: Vec<SignalType>,
    store: Mutex<Store>,
    exports: AtomicU64,
}

impl MemoryBackend {
    pub fn new(dedup: bool) -> Self {
        Self {
            dedup,
            retained: DEFAULT_RETAINED_BATCHES,
            accepted: SignalType::ALL.to_vec(),
            store: Mutex::new(Store::default()),
            exports: AtomicU64::new(0),
        }
    }

    /// Store only the given signal types
    pub fn accepting(mut self, signals: &[SignalType]) -> Self {
        self.accepted = signals.to_vec();
        self
    }

    /// Cap the stored batches and the dedup window
    pub fn retaining(mut self, batches: usize) -> Self {
        self.retained = batches.max(1);
        self
    }

    /// Export calls received, duplicates included
    pub fn export_calls(&self) -> u64 {
        self.exports.load(Ordering::Relaxed)
    }

    pub fn batch_ids(&self) -> Vec<BatchId> {
        lock(&self.store).batches.iter().map(|(id, _)| *id).collect()
    }

    pub fn records(&self) -> Vec<SignalRecord> {
        lock(&self.store)
            .batches
            .iter()
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ExporterBackend for MemoryBackend {
    fn kind(&self) -> SinkKind {
        SinkKind::Memory
    }

    fn accepts(&self, signal: SignalType) -> bool {
        self.accepted.contains(&signal)
    }

    fn supports_dedup(&self) -> bool {
        self.dedup
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError> {
        self.exports.fetch_add(1, Ordering::Relaxed);
        let mut store = lock(&self.store);
        if self.dedup && !store.remember(request.batch_id, self.retained) {
            return Ok(());
        }
        store.push(request.batch_id, request.records.clone(), self.retained);
        Ok(())
    }
}
