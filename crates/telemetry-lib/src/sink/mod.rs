//! Exporter sinks: one isolated delivery path per backend
//!
//! This module provides:
//! - The `ExporterBackend` seam every backend wire format implements
//! - `ExporterSink` handles with a bounded, non-blocking queue
//! - A serial delivery worker per sink with retry, backoff and its own
//!   circuit breaker
//! - Backends for metrics remote-write, log bulk append, trace export, a
//!   third-party forwarder and an in-process store

mod forwarder;
mod http;
mod log_bulk;
mod mapping;
mod memory;
mod remote_write;
mod trace_export;
mod worker;


pub use forwarder::ForwarderBackend;
pub use http::{Auth, HttpPoster};
pub use log_bulk::LogBulkBackend;
pub use mapping::AttributeMapping;
pub use memory::MemoryBackend;
pub use remote_write::RemoteWriteBackend;
pub use trace_export::TraceExportBackend;
pub use worker::{ExporterSink, SinkConfig, SinkStats, SinkWorker};

use crate::config::{SinkDefinition, SinkKind};
use crate::error::{ConfigError, DeliveryError};
use crate::models::{BatchId, SignalRecord, SignalType};
use async_trait::async_trait;
use std::sync::Arc;

/// The slice of a batch one backend receives: filtered to the signal types it
/// accepts, with its attribute mapping applied
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub batch_id: BatchId,
    pub agent_id: String,
    pub sequence: u64,
    pub records: Vec<SignalRecord>,
}

impl ExportRequest {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Transport-specific export to one backend
#[async_trait]
pub trait ExporterBackend: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Signal types this backend stores
    fn accepts(&self, signal: SignalType) -> bool;

    /// Whether re-exporting a batch id is absorbed by the backend
    fn supports_dedup(&self) -> bool {
        false
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError>;
}

/// Instantiate the backend a definition names
pub fn build_backend(definition: &SinkDefinition) -> Result<Arc<dyn ExporterBackend>, ConfigError> {
    definition.validate()?;

    let poster = || -> Result<HttpPoster, ConfigError> {
        let endpoint = definition.endpoint.as_deref().unwrap_or_default();
        let auth = definition.auth_token.clone().map(|token| match definition.kind {
            SinkKind::Forwarder => Auth::ApiKey(token),
            _ => Auth::Bearer(token),
        });
        HttpPoster::new(endpoint, definition.request_timeout(), auth)
            .map(|p| p.with_retention_hint(definition.retention_hint_secs))
            .map_err(|e| ConfigError::InvalidSink {
                name: definition.name.clone(),
                reason: e.to_string(),
            })
    };

    let backend: Arc<dyn ExporterBackend> = match definition.kind {
        SinkKind::PrometheusRemoteWrite => Arc::new(RemoteWriteBackend::new(poster()?)),
        SinkKind::LogBulk => Arc::new(LogBulkBackend::new(poster()?)),
        SinkKind::TraceExport => Arc::new(TraceExportBackend::new(poster()?)),
        SinkKind::Forwarder => Arc::new(ForwarderBackend::new(poster()?, definition.dedup)),
        SinkKind::Memory => Arc::new(MemoryBackend::new(definition.dedup)),
    };
    Ok(backend)
}

/// Build the sink handle and its delivery worker from a definition
pub fn build_sink(definition: &SinkDefinition) -> Result<(ExporterSink, SinkWorker), ConfigError> {
    let backend = build_backend(definition)?;
    Ok(ExporterSink::new(SinkConfig::from_definition(definition), backend))
}
