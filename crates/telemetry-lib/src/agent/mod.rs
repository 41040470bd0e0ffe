//! Edge-side agent collector
//!
//! This module provides:
//! - Non-blocking ingestion into a bounded ring buffer, tagged with cluster identity
//! - Batch assembly on a flush interval or at the buffer's high-water mark
//! - Delivery to the hub behind a circuit breaker, with a bounded outbound queue
//! - Best-effort final flush on shutdown

mod collector;
mod transport;


pub use collector::{
    AgentCollector, AgentConfig, AgentStats, DeliveryReport, IngestOutcome, IngestSummary,
};
pub use transport::{HttpHubTransport, HubClientConfig, HubTransport};
