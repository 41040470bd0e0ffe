//! Metrics store backend speaking the Prometheus remote-write protocol

use super::http::HttpPoster;
use super::{ExportRequest, ExporterBackend};
use crate::config::SinkKind;
use crate::error::DeliveryError;
use crate::models::{Payload, SignalType};
use async_trait::async_trait;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::BTreeMap;

const REMOTE_WRITE_VERSION: &str = "0.1.0";

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

pub struct RemoteWriteBackend {
    poster: HttpPoster,
}

impl RemoteWriteBackend {
    pub fn new(poster: HttpPoster) -> Self {
        Self { poster }
    }
}

#[async_trait]
impl ExporterBackend for RemoteWriteBackend {
    fn kind(&self) -> SinkKind {
        SinkKind::PrometheusRemoteWrite
    }

    fn accepts(&self, signal: SignalType) -> bool {
        signal == SignalType::Metric
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError> {
        let body = snap::raw::Encoder::new()
            .compress_vec(&write_request(request).encode_to_vec())
            .map_err(|e| DeliveryError::Permanent(format!("snappy encode: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-prometheus-remote-write-version",
            HeaderValue::from_static(REMOTE_WRITE_VERSION),
        );
        self.poster
            .post(
                request,
                "application/x-protobuf",
                Some("snappy"),
                headers,
                body,
            )
            .await
    }
}

/// One series per metric record; labels sorted by name
pub fn write_request(request: &ExportRequest) -> WriteRequest {
    let timeseries = request
        .records
        .iter()
        .filter_map(|record| {
            let Payload::Metric { name, value, unit } = &record.payload else {
                return None;
            };

            let mut labels: BTreeMap<String, String> = record
                .resource_attributes
                .iter()
                .map(|(k, v)| (label_name(k), v.clone()))
                .collect();
            if !unit.is_empty() {
                labels.insert("unit".to_string(), unit.clone());
            }
            labels.insert("__name__".to_string(), label_name(name));

            Some(TimeSeries {
                labels: labels
                    .into_iter()
                    .map(|(name, value)| Label { name, value })
                    .collect(),
                samples: vec![Sample {
                    value: *value,
                    timestamp: record.timestamp.timestamp_millis(),
                }],
            })
        })
        .collect();

    WriteRequest { timeseries }
}

/// Coerce to `[a-zA-Z_][a-zA-Z0-9_]*`
fn label_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) || name.is_empty() {
        name.insert(0, '_');
    }
    name
}
