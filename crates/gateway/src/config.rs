//! Gateway configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_lib::{
    config::{validate_sinks, SinkDefinition},
    gateway::GatewayOptions,
    models::attributes,
    ConfigError,
};

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "GATEWAY_CONFIG_FILE";

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// API server port for batch push, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub backpressure: BackpressureSettings,

    /// Attributes every record must carry
    #[serde(default = "default_required_attributes")]
    pub required_attributes: Vec<String>,

    /// Backends to fan out to; at least one must be enabled
    #[serde(default)]
    pub sinks: Vec<SinkDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpressureSettings {
    /// Admitted-but-unreleased byte ceiling
    #[serde(default = "default_ceiling_bytes")]
    pub ceiling_bytes: u64,
    /// Longest a batch may hold admitted bytes
    #[serde(default = "default_max_retention_secs")]
    pub max_retention_secs: u64,
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            ceiling_bytes: default_ceiling_bytes(),
            max_retention_secs: default_max_retention_secs(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

fn default_api_port() -> u16 {
    9090
}

fn default_required_attributes() -> Vec<String> {
    vec![attributes::CLUSTER_NAME.to_string()]
}

fn default_ceiling_bytes() -> u64 {
    256 * 1024 * 1024
}

/// One day; a batch held longer is lost to its sink anyway
const MAX_RETENTION_SECS: u64 = 86_400;

fn default_max_retention_secs() -> u64 {
    300
}

fn default_reap_interval_ms() -> u64 {
    1_000
}

impl GatewaySettings {
    /// Load from the optional config file, then `GATEWAY__*` environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(file, config::Environment::with_prefix("GATEWAY"))
    }

    fn load_with(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Self = builder
            .add_source(env.separator("__").try_parsing(true))
            .build()
            .context("failed to read gateway configuration")?
            .try_deserialize()
            .context("invalid gateway configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backpressure.ceiling_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "backpressure.ceiling_bytes",
                reason: "must be positive".to_string(),
            });
        }
        if self.backpressure.max_retention_secs == 0
            || self.backpressure.max_retention_secs > MAX_RETENTION_SECS
        {
            return Err(ConfigError::Invalid {
                field: "backpressure.max_retention_secs",
                reason: format!("must be between 1 and {MAX_RETENTION_SECS}"),
            });
        }
        if self.backpressure.reap_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "backpressure.reap_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        validate_sinks(&self.sinks)
    }

    pub fn enabled_sinks(&self) -> impl Iterator<Item = &SinkDefinition> {
        self.sinks.iter().filter(|sink| sink.enabled)
    }

    pub fn pipeline_options(&self) -> GatewayOptions {
        GatewayOptions {
            required_attributes: self.required_attributes.clone(),
            max_retention: Duration::from_secs(self.backpressure.max_retention_secs),
            reap_interval: Duration::from_millis(self.backpressure.reap_interval_ms),
        }
    }
}

/// Config file from `--config <path>` or `GATEWAY_CONFIG_FILE`
pub fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from)
}
