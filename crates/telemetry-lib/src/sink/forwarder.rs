//! Third-party forwarder: every signal type, JSON envelope, API-key auth

use super::http::HttpPoster;
use super::{ExportRequest, ExporterBackend};
use crate::config::SinkKind;
use crate::error::DeliveryError;
use crate::models::{BatchId, SignalRecord, SignalType};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    batch_id: BatchId,
    agent_id: &'a str,
    sequence: u64,
    records: &'a [SignalRecord],
}

pub struct ForwarderBackend {
    poster: HttpPoster,
    dedup: bool,
}

impl ForwarderBackend {
    /// `dedup` declares that the vendor honours the batch id header
    pub fn new(poster: HttpPoster, dedup: bool) -> Self {
        Self { poster, dedup }
    }
}

#[async_trait]
impl ExporterBackend for ForwarderBackend {
    fn kind(&self) -> SinkKind {
        SinkKind::Forwarder
    }

    fn accepts(&self, _signal: SignalType) -> bool {
        true
    }

    fn supports_dedup(&self) -> bool {
        self.dedup
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), DeliveryError> {
        let envelope = Envelope {
            batch_id: request.batch_id,
            agent_id: &request.agent_id,
            sequence: request.sequence,
            records: &request.records,
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| DeliveryError::Permanent(format!("envelope encoding: {e}")))?;
        self.poster
            .post(request, "application/json", None, HeaderMap::new(), body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::http::{Auth, API_KEY_HEADER};
    use mockito::Matcher;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_all_types_with_api_key() {
        let mut server = mockito::Server::new_async().await;
        let request = ExportRequest {
            batch_id: BatchId::new(),
            agent_id: "edge-a-agent".to_string(),
            sequence: 9,
            records: vec![
                SignalRecord::metric("cpu", 1.0, "cores"),
                SignalRecord::span("t", "s", "op", 10),
            ],
        };
        let mock = server
            .mock("POST", "/v1/intake")
            .match_header(API_KEY_HEADER, "vendor-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "agent_id": "edge-a-agent",
                "sequence": 9,
            })))
            .with_status(202)
            .create_async()
            .await;

        let poster = HttpPoster::new(
            &format!("{}/v1/intake", server.url()),
            Duration::from_secs(2),
            Some(Auth::ApiKey("vendor-key".to_string())),
        )
        .unwrap();
        let backend = ForwarderBackend::new(poster, true);

        assert!(SignalType::ALL.iter().all(|s| backend.accepts(*s)));
        assert!(backend.supports_dedup());
        backend.export(&request).await.unwrap();
        mock.assert_async().await;
    }
}
