//! Protobuf wire format for agent to gateway batch pushes
//!
//! Messages are declared by hand with `prost` derives so no `protoc` is
//! needed at build time. Field tags are stable and must not be reused.

use crate::error::AdmissionError;
use crate::models::{Batch, BatchId, Payload, Severity, SignalRecord};
use chrono::{DateTime, Utc};
use prost::Message;
use std::collections::HashMap;

/// Content type used on the batch push endpoint
pub const CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Clone, PartialEq, Message)]
pub struct BatchMessage {
    #[prost(string, tag = "1")]
    pub batch_id: String,
    #[prost(string, tag = "2")]
    pub agent_id: String,
    #[prost(uint64, tag = "3")]
    pub sequence: u64,
    #[prost(message, optional, tag = "4")]
    pub created_at: Option<prost_types::Timestamp>,
    #[prost(message, repeated, tag = "5")]
    pub records: Vec<RecordMessage>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RecordMessage {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<prost_types::Timestamp>,
    #[prost(map = "string, string", tag = "2")]
    pub attributes: HashMap<String, String>,
    #[prost(oneof = "record_message::Payload", tags = "3, 4, 5")]
    pub payload: Option<record_message::Payload>,
}

pub mod record_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        Metric(super::MetricPoint),
        #[prost(message, tag = "4")]
        Log(super::LogEntry),
        #[prost(message, tag = "5")]
        Span(super::SpanData),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricPoint {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(string, tag = "3")]
    pub unit: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub body: String,
    #[prost(int32, tag = "2")]
    pub severity: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SpanData {
    #[prost(string, tag = "1")]
    pub trace_id: String,
    #[prost(string, tag = "2")]
    pub span_id: String,
    #[prost(string, tag = "3")]
    pub parent_span_id: String,
    #[prost(string, tag = "4")]
    pub name: String,
    #[prost(uint64, tag = "5")]
    pub duration_ns: u64,
}

/// A batch decoded at the gateway, with the count of records that could not
/// be converted and were dropped individually
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    pub batch: Batch,
    pub malformed_records: usize,
}

/// Serialize a batch for the wire
pub fn encode_batch(batch: &Batch) -> Vec<u8> {
    BatchMessage::from(batch).encode_to_vec()
}

/// Decode a pushed batch. Structural problems reject the whole batch;
/// a record without a payload or timestamp is dropped on its own.
pub fn decode_batch(bytes: &[u8]) -> Result<DecodedBatch, AdmissionError> {
    let message = BatchMessage::decode(bytes)
        .map_err(|e| AdmissionError::Malformed(format!("undecodable batch: {e}")))?;

    let batch_id = BatchId::parse(&message.batch_id)
        .ok_or_else(|| AdmissionError::Malformed(format!("invalid batch id `{}`", message.batch_id)))?;
    if message.agent_id.is_empty() {
        return Err(AdmissionError::Malformed("missing agent id".to_string()));
    }

    let total = message.records.len();
    let records: Vec<SignalRecord> = message
        .records
        .into_iter()
        .filter_map(convert_record)
        .collect();

    Ok(DecodedBatch {
        malformed_records: total - records.len(),
        batch: Batch {
            batch_id,
            agent_id: message.agent_id,
            sequence: message.sequence,
            created_at: message
                .created_at
                .and_then(from_timestamp)
                .unwrap_or_else(Utc::now),
            records,
        },
    })
}

impl From<&Batch> for BatchMessage {
    fn from(batch: &Batch) -> Self {
        BatchMessage {
            batch_id: batch.batch_id.to_string(),
            agent_id: batch.agent_id.clone(),
            sequence: batch.sequence,
            created_at: Some(to_timestamp(&batch.created_at)),
            records: batch.records.iter().map(RecordMessage::from).collect(),
        }
    }
}

impl From<&SignalRecord> for RecordMessage {
    fn from(record: &SignalRecord) -> Self {
        let payload = match &record.payload {
            Payload::Metric { name, value, unit } => {
                record_message::Payload::Metric(MetricPoint {
                    name: name.clone(),
                    value: *value,
                    unit: unit.clone(),
                })
            }
            Payload::Log { body, severity } => record_message::Payload::Log(LogEntry {
                body: body.clone(),
                severity: severity.as_number(),
            }),
            Payload::Span {
                trace_id,
                span_id,
                parent_span_id,
                name,
                duration_ns,
            } => record_message::Payload::Span(SpanData {
                trace_id: trace_id.clone(),
                span_id: span_id.clone(),
                parent_span_id: parent_span_id.clone().unwrap_or_default(),
                name: name.clone(),
                duration_ns: *duration_ns,
            }),
        };

        RecordMessage {
            timestamp: Some(to_timestamp(&record.timestamp)),
            attributes: record.resource_attributes.clone(),
            payload: Some(payload),
        }
    }
}

fn convert_record(message: RecordMessage) -> Option<SignalRecord> {
    let timestamp = message.timestamp.and_then(from_timestamp)?;
    let payload = match message.payload? {
        record_message::Payload::Metric(m) => Payload::Metric {
            name: m.name,
            value: m.value,
            unit: m.unit,
        },
        record_message::Payload::Log(l) => Payload::Log {
            body: l.body,
            severity: Severity::from_number(l.severity),
        },
        record_message::Payload::Span(s) => Payload::Span {
            trace_id: s.trace_id,
            span_id: s.span_id,
            parent_span_id: Some(s.parent_span_id).filter(|p| !p.is_empty()),
            name: s.name,
            duration_ns: s.duration_ns,
        },
    };

    Some(SignalRecord {
        timestamp,
        resource_attributes: message.attributes,
        payload,
    })
}

fn to_timestamp(dt: &DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn from_timestamp(ts: prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
}
