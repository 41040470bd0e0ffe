//! Gateway pipeline: admission, normalization and fan-out at the hub
//!
//! This module provides:
//! - Byte-budget admission against the shared backpressure controller
//! - Per-record validation of required resource attributes
//! - Fan-out of one shared batch to every exporter sink
//! - A retention reaper that force-releases batches held too long

mod pipeline;


pub use pipeline::{AdmittedBatch, GatewayOptions, GatewayPipeline, GatewayStats, SubmitReport};
