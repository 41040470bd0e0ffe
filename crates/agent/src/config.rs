//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_lib::{
    agent::{AgentConfig, HubClientConfig},
    config::{CircuitSettings, ClusterSettings},
    queue::OverflowPolicy,
    ConfigError,
};

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "AGENT_CONFIG_FILE";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Agent identity in pushed batches, from the Kubernetes downward API
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// API server port for ingestion, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Edge cluster identity; required
    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub buffer: BufferSettings,

    /// Breaker toward the hub
    #[serde(default)]
    pub circuit: CircuitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_hub_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            endpoint: default_hub_endpoint(),
            auth_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl HubSettings {
    pub fn to_client_config(&self) -> HubClientConfig {
        HubClientConfig {
            endpoint: self.endpoint.clone(),
            auth_token: self.auth_token.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            high_water_mark: default_high_water_mark(),
            overflow: default_overflow(),
            flush_interval_ms: default_flush_interval_ms(),
            outbound_capacity: default_outbound_capacity(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
        }
    }
}

fn default_agent_id() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "telemetry-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_hub_endpoint() -> String {
    "http://telemetry-gateway:9090".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_capacity() -> usize {
    10_000
}

fn default_high_water_mark() -> usize {
    8_000
}

fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_shutdown_deadline_ms() -> u64 {
    5_000
}

impl AgentSettings {
    /// Load from the optional config file, then `AGENT__*` environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(file, config::Environment::with_prefix("AGENT"))
    }

    fn load_with(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Self = builder
            .add_source(env.separator("__").try_parsing(true))
            .build()
            .context("failed to read agent configuration")?
            .try_deserialize()
            .context("invalid agent configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the agent cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cluster.identity()?;
        self.circuit.validate()?;
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer.capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.buffer.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer.flush_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            agent_id: self.agent_id.clone(),
            buffer_capacity: self.buffer.capacity,
            high_water_mark: self.buffer.high_water_mark,
            overflow_policy: self.buffer.overflow,
            flush_interval: Duration::from_millis(self.buffer.flush_interval_ms),
            outbound_capacity: self.buffer.outbound_capacity,
            circuit: self.circuit.to_breaker_config(),
            shutdown_deadline: Duration::from_millis(self.buffer.shutdown_deadline_ms),
        }
    }
}

/// Config file from `--config <path>` or `AGENT_CONFIG_FILE`
pub fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from)
}
