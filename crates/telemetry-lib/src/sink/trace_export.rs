//! Trace store backend: Zipkin v2 JSON span export

use super::http::HttpPoster;
use super::{ExportRequest, ExporterBackend};
use crate::config::SinkKind;
use crate::error::DeliveryError;
use crate::models::{attributes, Payload, SignalType};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipkinSpan<'a> {
    trace_id: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    name: &'a str,
    /// Epoch microseconds
    timestamp: i64,
    /// Microseconds
    duration: u64,
    local_endpoint: Endpoint<'a>,
    tags: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint<'a> {
    service_name: &'a str,
}

pub struct TraceExportBackend {
    poster: HttpPoster,
}

impl TraceExportBackend {
    pub fn new(poster: HttpPoster) -> Self {
        Self { poster }
    }
}

#[async_trait]
impl ExporterBackend for TraceExportBackend {
    fn kind(&self) -> SinkKind {
        SinkKind::TraceExport
    }

    fn accepts(&self, signal: SignalType) -> bool {
        signal == SignalType::Trace
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&spans(request))
            .map_err(|e| DeliveryError::Permanent(format!("span encoding: {e}")))?;
        self.poster
            .post(request, "application/json", None, HeaderMap::new(), body)
            .await
    }
}

pub fn spans(request: &ExportRequest) -> Vec<ZipkinSpan<'_>> {
    request
        .records
        .iter()
        .filter_map(|record| {
            let Payload::Span {
                trace_id,
                span_id,
                parent_span_id,
                name,
                duration_ns,
            } = &record.payload
            else {
                return None;
            };

            let service_name = record
                .attribute(attributes::DEPLOYMENT)
                .or_else(|| record.attribute(attributes::CLUSTER_NAME))
                .unwrap_or("unknown");

            Some(ZipkinSpan {
                trace_id,
                id: span_id,
                parent_id: parent_span_id.as_deref(),
                name,
                timestamp: record.timestamp.timestamp_micros(),
                duration: duration_ns / 1_000,
                local_endpoint: Endpoint { service_name },
                tags: &record.resource_attributes,
            })
        })
        .collect()
}
