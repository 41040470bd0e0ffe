//! Batch push transport from agent to hub

use crate::error::{check_response, ConfigError, DeliveryError};
use crate::models::Batch;
use crate::proto;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Header carrying the batch id as idempotency key
pub const BATCH_ID_HEADER: &str = "x-batch-id";

/// Header identifying the pushing agent
pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// Delivers one batch to the hub
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

/// Configuration for the HTTP hub client
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Gateway base URL (e.g., "https://telemetry-hub:9443")
    pub endpoint: String,
    /// Bearer token presented to the gateway
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://telemetry-gateway:9090".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Protobuf-over-HTTP push to `POST {endpoint}/v1/batches`
#[derive(Debug, Clone)]
pub struct HttpHubTransport {
    client: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
}

impl HttpHubTransport {
    pub fn new(config: HubClientConfig) -> Result<Self, ConfigError> {
        let url = format!("{}/v1/batches", config.endpoint.trim_end_matches('/'));
        let url = Url::parse(&url).map_err(|e| ConfigError::Invalid {
            field: "hub.endpoint",
            reason: format!("`{}`: {e}", config.endpoint),
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "hub",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            auth_token: config.auth_token,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HubTransport for HttpHubTransport {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = proto::encode_batch(batch);
        let size = body.len();

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, proto::CONTENT_TYPE)
            .header(BATCH_ID_HEADER, batch.batch_id.to_string())
            .header(AGENT_ID_HEADER, batch.agent_id.as_str())
            .body(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        check_response(response).await?;

        debug!(
            batch_id = %batch.batch_id,
            sequence = batch.sequence,
            records = batch.len(),
            bytes = size,
            "Batch pushed to hub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{attributes, SignalRecord};

    fn batch() -> Batch {
        Batch::new(
            "edge-a-agent",
            0,
            vec![SignalRecord::metric("cpu", 1.0, "cores")
                .with_attribute(attributes::CLUSTER_NAME, "edge-a")],
        )
    }

    fn transport(url: &str) -> HttpHubTransport {
        HttpHubTransport::new(HubClientConfig {
            endpoint: url.to_string(),
            auth_token: Some("secret".to_string()),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = HttpHubTransport::new(HubClientConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "hub.endpoint", .. }));
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let t = transport("http://hub:9090/");
        assert_eq!(t.url().as_str(), "http://hub:9090/v1/batches");
    }

    #[tokio::test]
    async fn test_push_sends_protobuf_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let batch = batch();
        let mock = server
            .mock("POST", "/v1/batches")
            .match_header("content-type", proto::CONTENT_TYPE)
            .match_header("authorization", "Bearer secret")
            .match_header(BATCH_ID_HEADER, batch.batch_id.to_string().as_str())
            .with_status(200)
            .create_async()
            .await;

        transport(&server.url()).send(&batch).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _busy = server
            .mock("POST", "/v1/batches")
            .with_status(503)
            .with_body("backpressure ceiling exceeded")
            .create_async()
            .await;

        let err = transport(&server.url()).send(&batch()).await.unwrap_err();
        assert!(err.is_retryable());

        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("POST", "/v1/batches")
            .with_status(400)
            .with_body("malformed batch")
            .create_async()
            .await;

        let err = transport(&server.url()).send(&batch()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Port 9 (discard) is closed on test hosts
        let err = transport("http://127.0.0.1:9").send(&batch()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
