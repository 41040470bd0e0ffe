//! Shared HTTP delivery for the network backends

use super::ExportRequest;
use crate::error::{check_response, ConfigError, DeliveryError};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;

pub const BATCH_ID_HEADER: &str = "x-batch-id";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const RETENTION_HEADER: &str = "x-retention-seconds";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Credentials presented to a backend
#[derive(Debug, Clone)]
pub enum Auth {
    Bearer(String),
    ApiKey(String),
}

/// POSTs one encoded export request and classifies the answer
#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: reqwest::Client,
    url: Url,
    auth: Option<Auth>,
    retention_hint_secs: Option<u64>,
}

impl HttpPoster {
    pub fn new(endpoint: &str, timeout: Duration, auth: Option<Auth>) -> Result<Self, ConfigError> {
        let url = Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
            field: "sink.endpoint",
            reason: format!("`{endpoint}`: {e}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "sink",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            auth,
            retention_hint_secs: None,
        })
    }

    pub fn with_retention_hint(mut self, secs: Option<u64>) -> Self {
        self.retention_hint_secs = secs;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send `body`; the batch id travels as the idempotency key
    pub async fn post(
        &self,
        request: &ExportRequest,
        content_type: &'static str,
        content_encoding: Option<&'static str>,
        extra: HeaderMap,
        body: Vec<u8>,
    ) -> Result<(), DeliveryError> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .header(BATCH_ID_HEADER, request.batch_id.to_string())
            .header(AGENT_ID_HEADER, request.agent_id.as_str())
            .headers(extra)
            .body(body);

        if let Some(encoding) = content_encoding {
            builder = builder.header(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        if let Some(secs) = self.retention_hint_secs {
            builder = builder.header(RETENTION_HEADER, secs.to_string());
        }
        builder = match &self.auth {
            Some(Auth::Bearer(token)) => builder.bearer_auth(token),
            Some(Auth::ApiKey(key)) => builder.header(API_KEY_HEADER, key.as_str()),
            None => builder,
        };

        let response = builder.send().await?;
        check_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatchId;

    fn request() -> ExportRequest {
        ExportRequest {
            batch_id: BatchId::new(),
            agent_id: "edge-a-agent".to_string(),
            sequence: 3,
            records: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_headers_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let request = request();
        let mock = server
            .mock("POST", "/ingest")
            .match_header(BATCH_ID_HEADER, request.batch_id.to_string().as_str())
            .match_header(AGENT_ID_HEADER, "edge-a-agent")
            .match_header(RETENTION_HEADER, "86400")
            .match_header(API_KEY_HEADER, "k-123")
            .with_status(202)
            .create_async()
            .await;

        let poster = HttpPoster::new(
            &format!("{}/ingest", server.url()),
            Duration::from_secs(2),
            Some(Auth::ApiKey("k-123".to_string())),
        )
        .unwrap()
        .with_retention_hint(Some(86_400));

        poster
            .post(&request, "application/json", None, HeaderMap::new(), b"{}".to_vec())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(429)
            .create_async()
            .await;

        let poster = HttpPoster::new(&server.url(), Duration::from_secs(2), None).unwrap();
        let err = poster
            .post(&request(), "application/json", None, HeaderMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
