//! Federated telemetry pipeline library
//!
//! This crate provides the core functionality for:
//! - Tagging and buffering telemetry at the edge (agent collector)
//! - Admission, normalization and fan-out at the hub (gateway pipeline)
//! - Isolated, retrying delivery to each storage backend (exporter sinks)
//! - Circuit breaking, backpressure and the batch wire codec
//! - Health checks, HTTP surfaces and observability

pub mod agent;
pub mod api;
pub mod backpressure;
pub mod circuit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod models;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod retry;
pub mod sink;
pub mod tagger;

pub use error::{AdmissionError, ConfigError, DeliveryError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
