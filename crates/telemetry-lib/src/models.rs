//! Core data models for the telemetry pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Well-known resource attribute keys
pub mod attributes {
    pub const CLUSTER_PREFIX: &str = "cluster.";
    pub const CLUSTER_NAME: &str = "cluster.name";
    pub const CLUSTER_REGION: &str = "cluster.region";
    pub const CLUSTER_ENVIRONMENT: &str = "cluster.environment";
    pub const NAMESPACE: &str = "k8s.namespace.name";
    pub const POD: &str = "k8s.pod.name";
    pub const DEPLOYMENT: &str = "k8s.deployment.name";
}

/// Fixed per-record overhead used by size estimation
const RECORD_OVERHEAD_BYTES: usize = 64;

/// Fixed per-batch overhead used by size estimation
const BATCH_OVERHEAD_BYTES: usize = 96;

/// Kind of telemetry carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Metric,
    Log,
    Trace,
}

impl SignalType {
    pub const ALL: [SignalType; 3] = [SignalType::Metric, SignalType::Log, SignalType::Trace];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Metric => "metric",
            SignalType::Log => "log",
            SignalType::Trace => "trace",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Wire representation (OpenTelemetry severity ranges)
    pub fn as_number(&self) -> i32 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }

    pub fn from_number(n: i32) -> Self {
        match n {
            i32::MIN..=4 => Severity::Trace,
            5..=8 => Severity::Debug,
            9..=12 => Severity::Info,
            13..=16 => Severity::Warn,
            17..=20 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

/// Signal-type-specific body of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Metric {
        name: String,
        value: f64,
        #[serde(default)]
        unit: String,
    },
    Log {
        body: String,
        #[serde(default)]
        severity: Severity,
    },
    #[serde(rename = "trace")]
    Span {
        trace_id: String,
        span_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_span_id: Option<String>,
        name: String,
        duration_ns: u64,
    },
}

impl Payload {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Payload::Metric { .. } => SignalType::Metric,
            Payload::Log { .. } => SignalType::Log,
            Payload::Span { .. } => SignalType::Trace,
        }
    }

    fn estimated_size(&self) -> usize {
        match self {
            Payload::Metric { name, unit, .. } => name.len() + unit.len() + 8,
            Payload::Log { body, .. } => body.len() + 4,
            Payload::Span {
                trace_id,
                span_id,
                parent_span_id,
                name,
                ..
            } => {
                trace_id.len()
                    + span_id.len()
                    + parent_span_id.as_ref().map_or(0, String::len)
                    + name.len()
                    + 8
            }
        }
    }
}

/// One metric point, log line or trace span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    pub payload: Payload,
}

impl SignalRecord {
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp: Utc::now(),
            resource_attributes: HashMap::new(),
            payload,
        }
    }

    pub fn metric(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self::new(Payload::Metric {
            name: name.into(),
            value,
            unit: unit.into(),
        })
    }

    pub fn log(body: impl Into<String>, severity: Severity) -> Self {
        Self::new(Payload::Log {
            body: body.into(),
            severity,
        })
    }

    pub fn span(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        duration_ns: u64,
    ) -> Self {
        Self::new(Payload::Span {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            duration_ns,
        })
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    /// The signal type is derived from the payload so the two never disagree
    pub fn signal_type(&self) -> SignalType {
        self.payload.signal_type()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.resource_attributes.get(key).map(String::as_str)
    }

    /// Rough in-memory footprint used for admission accounting
    pub fn estimated_size(&self) -> usize {
        let attrs: usize = self
            .resource_attributes
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        RECORD_OVERHEAD_BYTES + attrs + self.payload.estimated_size()
    }
}

/// Unique batch identity, used as the idempotency key on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Records flushed together by one agent export cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub agent_id: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub records: Vec<SignalRecord>,
}

impl Batch {
    pub fn new(agent_id: impl Into<String>, sequence: u64, records: Vec<SignalRecord>) -> Self {
        Self {
            batch_id: BatchId::new(),
            agent_id: agent_id.into(),
            sequence,
            created_at: Utc::now(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn estimated_size(&self) -> usize {
        BATCH_OVERHEAD_BYTES
            + self.agent_id.len()
            + self
                .records
                .iter()
                .map(SignalRecord::estimated_size)
                .sum::<usize>()
    }

    /// Number of records per signal type
    pub fn signal_counts(&self) -> HashMap<SignalType, usize> {
        let mut counts = HashMap::new();
        for record in &self.records {
            *counts.entry(record.signal_type()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_type_follows_payload() {
        assert_eq!(
            SignalRecord::metric("cpu", 0.5, "cores").signal_type(),
            SignalType::Metric
        );
        assert_eq!(
            SignalRecord::log("hello", Severity::Warn).signal_type(),
            SignalType::Log
        );
        assert_eq!(
            SignalRecord::span("t1", "s1", "GET /", 1_000).signal_type(),
            SignalType::Trace
        );
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{
            "resource_attributes": {"k8s.pod.name": "api-0"},
            "payload": {"type": "log", "body": "started", "severity": "error"}
        }"#;
        let record: SignalRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.signal_type(), SignalType::Log);
        assert_eq!(record.attribute(attributes::POD), Some("api-0"));

        let span = r#"{"payload": {"type": "trace", "trace_id": "a", "span_id": "b", "name": "op", "duration_ns": 5}}"#;
        let record: SignalRecord = serde_json::from_str(span).unwrap();
        assert_eq!(record.signal_type(), SignalType::Trace);
    }

    #[test]
    fn test_estimated_size_grows_with_attributes() {
        let bare = SignalRecord::metric("requests", 1.0, "");
        let tagged = bare.clone().with_attribute(attributes::CLUSTER_NAME, "edge-a");
        assert!(tagged.estimated_size() > bare.estimated_size());

        let batch = Batch::new("agent-1", 0, vec![bare, tagged]);
        assert!(batch.estimated_size() > batch.records[1].estimated_size());
    }

    #[test]
    fn test_batch_ids_unique() {
        let a = Batch::new("agent", 1, vec![]);
        let b = Batch::new("agent", 2, vec![]);
        assert_ne!(a.batch_id, b.batch_id);
        assert_eq!(BatchId::parse(&a.batch_id.to_string()), Some(a.batch_id));
    }

    #[test]
    fn test_severity_number_round_trip() {
        for severity in [
            Severity::Trace,
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ] {
            assert_eq!(Severity::from_number(severity.as_number()), severity);
        }
    }

    #[test]
    fn test_signal_counts() {
        let batch = Batch::new(
            "agent",
            0,
            vec![
                SignalRecord::metric("a", 1.0, ""),
                SignalRecord::metric("b", 2.0, ""),
                SignalRecord::log("c", Severity::Info),
            ],
        );
        let counts = batch.signal_counts();
        assert_eq!(counts[&SignalType::Metric], 2);
        assert_eq!(counts[&SignalType::Log], 1);
        assert!(!counts.contains_key(&SignalType::Trace));
    }
}
