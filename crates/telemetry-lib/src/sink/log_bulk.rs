//! Log store backend: newline-delimited JSON bulk append

use super::http::HttpPoster;
use super::{ExportRequest, ExporterBackend};
use crate::config::SinkKind;
use crate::error::DeliveryError;
use crate::models::{Payload, SignalType};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::HeaderMap;
use serde_json::json;

pub struct LogBulkBackend {
    poster: HttpPoster,
}

impl LogBulkBackend {
    pub fn new(poster: HttpPoster) -> Self {
        Self { poster }
    }
}

#[async_trait]
impl ExporterBackend for LogBulkBackend {
    fn kind(&self) -> SinkKind {
        SinkKind::LogBulk
    }

    fn accepts(&self, signal: SignalType) -> bool {
        signal == SignalType::Log
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError> {
        self.poster
            .post(
                request,
                "application/x-ndjson",
                None,
                HeaderMap::new(),
                ndjson(request).into_bytes(),
            )
            .await
    }
}

/// One JSON document per log line
pub fn ndjson(request: &ExportRequest) -> String {
    let mut body = String::new();
    for record in &request.records {
        let Payload::Log { body: line, severity } = &record.payload else {
            continue;
        };
        let doc = json!({
            "timestamp": record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "severity": severity.as_str(),
            "body": line,
            "attributes": record.resource_attributes,
            "batch_id": request.batch_id,
        });
        body.push_str(&doc.to_string());
        body.push('\n');
    }
    body
}
