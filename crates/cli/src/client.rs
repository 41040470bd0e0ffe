//! HTTP client for the agent and gateway APIs

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use telemetry_lib::{agent::AgentStats, gateway::GatewayStats};
use url::Url;

/// API client bound to one agent or gateway
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// POST a JSON body and hand back the status, whatever it is
    ///
    /// The load generator counts 503s rather than failing on them.
    pub async fn post_status<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<StatusCode> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        // Drain so the connection goes back to the pool
        let _ = response.bytes().await;
        Ok(status)
    }

    /// Fetch `/stats` and work out which kind of node answered
    pub async fn stats(&self) -> Result<NodeStats> {
        self.get("stats").await
    }
}

/// `/stats` payload of either node kind
///
/// The gateway shape is tried first since only it carries `sinks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeStats {
    Gateway(GatewayStats),
    Agent(AgentStats),
}

impl NodeStats {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeStats::Gateway(_) => "gateway",
            NodeStats::Agent(_) => "agent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_STATS: &str = r#"{
        "agent_id": "edge-a-agent",
        "ingested": 120,
        "buffered": 20,
        "buffer_capacity": 10000,
        "outbound_batches": 0,
        "dropped_overflow": 0,
        "rejected": 0,
        "batches_assembled": 1,
        "batches_sent": 1,
        "batches_dropped": 0,
        "records_sent": 100,
        "records_dropped_outbound": 0,
        "records_discarded_on_shutdown": 0,
        "circuit_state": "closed",
        "consecutive_failures": 0,
        "last_flush": null
    }"#;

    const GATEWAY_STATS: &str = r#"{
        "batches_admitted": 4,
        "batches_rejected": 1,
        "batches_malformed": 0,
        "records_accepted": 12,
        "records_invalid": 0,
        "admitted_bytes": 2048,
        "ceiling_bytes": 4096,
        "retained_batches": 1,
        "force_released": 0,
        "sinks": [{
            "name": "metrics",
            "kind": "memory",
            "dedup": true,
            "offered": 4,
            "enqueued": 4,
            "delivered": 3,
            "dropped_queue_full": 0,
            "dropped_permanent": 0,
            "dropped_exhausted": 0,
            "dropped_shutdown": 0,
            "retries": 2,
            "queue_depth": 1,
            "in_flight": true,
            "circuit_state": "half_open"
        }]
    }"#;

    #[tokio::test]
    async fn test_stats_detects_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stats")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(AGENT_STATS)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let stats = client.stats().await.unwrap();

        mock.assert_async().await;
        assert_eq!(stats.kind(), "agent");
        match stats {
            NodeStats::Agent(agent) => assert_eq!(agent.ingested, 120),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stats_detects_gateway() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stats")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(GATEWAY_STATS)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        match client.stats().await.unwrap() {
            NodeStats::Gateway(gateway) => {
                assert_eq!(gateway.sinks.len(), 1);
                assert_eq!(gateway.sinks[0].retries, 2);
                assert!(gateway.sinks[0].dedup);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stats")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.stats().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_post_status_returns_unavailable_without_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/records")
            .with_status(503)
            .with_body(r#"{"accepted":0,"evicted":0,"rejected":1}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = client
            .post_status("v1/records", &serde_json::json!([]))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
