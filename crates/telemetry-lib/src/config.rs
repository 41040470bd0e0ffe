//! Static configuration types shared by the agent and gateway binaries
//!
//! Everything here deserializes from the layered `config` sources the
//! binaries build (TOML file under environment overrides). Defaults match a
//! small single-node deployment.

use crate::circuit::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::models::SignalType;
use crate::queue::OverflowPolicy;
use crate::retry::RetryPolicy;
use crate::sink::AttributeMapping;
use crate::tagger::ClusterIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Identity of the edge cluster an agent runs in
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub environment: String,
    /// Additional `cluster.*` attributes (zone, provider, ...)
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ClusterSettings {
    /// Build the tagger identity; fails when name, region or environment is blank
    pub fn identity(&self) -> Result<ClusterIdentity, ConfigError> {
        let identity = ClusterIdentity::new(&self.name, &self.region, &self.environment)?;
        Ok(self
            .extra
            .iter()
            .fold(identity, |id, (key, value)| id.with_extra(key, value)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_base_cooldown_ms")]
    pub base_cooldown_ms: u64,
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_base_cooldown_ms() -> u64 {
    5_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            base_cooldown_ms: default_base_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl CircuitSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_cooldown_ms < self.base_cooldown_ms {
            return Err(ConfigError::Invalid {
                field: "circuit.max_cooldown_ms",
                reason: format!(
                    "{} is below base_cooldown_ms {}",
                    self.max_cooldown_ms, self.base_cooldown_ms
                ),
            });
        }
        Ok(())
    }

    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            base_cooldown: Duration::from_millis(self.base_cooldown_ms),
            max_cooldown: Duration::from_millis(self.max_cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// Backend implementation selected for a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Metrics store via the remote-write protocol
    PrometheusRemoteWrite,
    /// Log store bulk append (NDJSON)
    LogBulk,
    /// Trace store span export
    TraceExport,
    /// Third-party vendor API, all signal types
    Forwarder,
    /// In-process store, for tests and dry runs
    Memory,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::PrometheusRemoteWrite => "prometheus_remote_write",
            SinkKind::LogBulk => "log_bulk",
            SinkKind::TraceExport => "trace_export",
            SinkKind::Forwarder => "forwarder",
            SinkKind::Memory => "memory",
        }
    }

    pub fn requires_endpoint(&self) -> bool {
        !matches!(self, SinkKind::Memory)
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend the gateway fans out to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkDefinition {
    pub name: String,
    pub kind: SinkKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token, or API key for the forwarder
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Restrict the sink to these signal types on top of what the backend accepts
    #[serde(default)]
    pub signals: Option<Vec<SignalType>>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit: CircuitSettings,
    #[serde(default)]
    pub attribute_mapping: AttributeMapping,
    /// Retention/TTL hint passed to the backend
    #[serde(default)]
    pub retention_hint_secs: Option<u64>,
    /// Whether the backend deduplicates on the batch id
    #[serde(default)]
    pub dedup: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl SinkDefinition {
    /// Minimal enabled definition with defaults for everything else
    pub fn new(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            auth_token: None,
            enabled: true,
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            signals: None,
            retry: RetrySettings::default(),
            circuit: CircuitSettings::default(),
            attribute_mapping: AttributeMapping::default(),
            retention_hint_secs: None,
            dedup: false,
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSink {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1".to_string()));
        }
        if self.kind.requires_endpoint() {
            let endpoint = self
                .endpoint
                .as_deref()
                .ok_or_else(|| invalid(format!("kind `{}` requires an endpoint", self.kind)))?;
            reqwest::Url::parse(endpoint)
                .map_err(|e| invalid(format!("endpoint `{endpoint}`: {e}")))?;
        }
        if matches!(&self.signals, Some(signals) if signals.is_empty()) {
            return Err(invalid("signals must not be an empty list".to_string()));
        }
        self.circuit.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Validate every definition and reject duplicate names
pub fn validate_sinks(definitions: &[SinkDefinition]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for definition in definitions {
        definition.validate()?;
        if !seen.insert(definition.name.as_str()) {
            return Err(ConfigError::InvalidSink {
                name: definition.name.clone(),
                reason: "duplicate sink name".to_string(),
            });
        }
    }
    if !definitions.iter().any(|d| d.enabled) {
        return Err(ConfigError::Invalid {
            field: "sinks",
            reason: "at least one enabled sink is required".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attributes;

    #[test]
    fn test_blank_identity_is_fatal() {
        let settings = ClusterSettings {
            name: "edge-a".to_string(),
            region: "eu-west".to_string(),
            environment: "  ".to_string(),
            extra: BTreeMap::new(),
        };
        assert_eq!(
            settings.identity().unwrap_err(),
            ConfigError::MissingIdentity(attributes::CLUSTER_ENVIRONMENT)
        );
    }

    #[test]
    fn test_sink_definition_defaults() {
        let def: SinkDefinition = serde_json::from_str(
            r#"{"name": "logs", "kind": "log_bulk", "endpoint": "http://loki:3100/bulk"}"#,
        )
        .unwrap();

        assert!(def.enabled);
        assert_eq!(def.queue_capacity, 1_024);
        assert_eq!(def.overflow, OverflowPolicy::DropNewest);
        assert_eq!(def.retry.max_attempts, 5);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_http_sink_requires_endpoint() {
        let def = SinkDefinition::new("metrics", SinkKind::PrometheusRemoteWrite);
        assert!(matches!(
            def.validate(),
            Err(ConfigError::InvalidSink { .. })
        ));
        assert!(SinkDefinition::new("mem", SinkKind::Memory).validate().is_ok());
    }

    #[test]
    fn test_duplicate_sink_names_rejected() {
        let defs = vec![
            SinkDefinition::new("mem", SinkKind::Memory),
            SinkDefinition::new("mem", SinkKind::Memory),
        ];
        let err = validate_sinks(&defs).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_all_disabled_rejected() {
        let mut def = SinkDefinition::new("mem", SinkKind::Memory);
        def.enabled = false;
        assert!(validate_sinks(&[def]).is_err());
    }

    #[test]
    fn test_circuit_settings_conversion() {
        let settings = CircuitSettings {
            failure_threshold: 3,
            base_cooldown_ms: 1_000,
            max_cooldown_ms: 8_000,
        };
        let config = settings.to_breaker_config();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.max_cooldown, Duration::from_secs(8));

        let inverted = CircuitSettings {
            max_cooldown_ms: 10,
            ..settings
        };
        assert!(inverted.validate().is_err());
    }
}
