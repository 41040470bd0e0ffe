//! Component health for the `/healthz` and `/readyz` probes
//!
//! Both processes register their moving parts here: the agent its ingest
//! path, buffer and hub link, the gateway its pipeline, backpressure and one
//! entry per sink. A degraded component keeps the process ready; an
//! unhealthy one takes it out of rotation.

use crate::circuit::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still doing its job, e.g. buffering while the hub is unreachable
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The worst component status wins; no components means healthy
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    fn unhealthy_components(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const INGEST: &str = "ingest";
    pub const BUFFER: &str = "buffer";
    pub const HUB_LINK: &str = "hub_link";
    pub const PIPELINE: &str = "pipeline";
    pub const BACKPRESSURE: &str = "backpressure";

    /// Health key for an exporter sink
    pub fn sink(name: &str) -> String {
        format!("sink.{name}")
    }
}

#[derive(Debug, Default)]
struct Inner {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Reflect a breaker state; anything but closed degrades the component
    pub async fn set_circuit(&self, name: &str, state: CircuitState) {
        match state {
            CircuitState::Closed => self.set_healthy(name).await,
            other => self.set_degraded(name, format!("circuit {other}")).await,
        }
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut inner = self.inner.write().await;
        // Repeated reports of the same state keep their original timestamp
        if let Some(current) = inner.components.get(name) {
            if current.status == status && current.message == message {
                return;
            }
        }
        inner
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.inner.read().await.components.clone();
        HealthResponse::from_components(components)
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.inner.read().await.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Pipeline not yet initialized".to_string()),
            };
        }

        let health = self.health().await;
        let unhealthy = health.unhealthy_components();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}
