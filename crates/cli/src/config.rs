//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

pub const DEFAULT_AGENT_URL: &str = "http://localhost:8080";
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:9090";

/// CLI defaults read from `~/.config/fedtel/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent API used by `load` and as the `status` fallback
    pub agent_url: Option<String>,
    /// Gateway API used by `sinks`
    pub gateway_url: Option<String>,
    /// Default output format
    pub default_format: Option<OutputFormat>,
}

impl Config {
    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    pub fn agent_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.agent_url.clone())
            .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string())
    }

    pub fn gateway_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.gateway_url.clone())
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string())
    }

    pub fn format(&self, flag: Option<OutputFormat>) -> OutputFormat {
        flag.or(self.default_format).unwrap_or_default()
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("fedtel").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_builtin_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();

        assert_eq!(config.agent_url(None), DEFAULT_AGENT_URL);
        assert_eq!(config.gateway_url(None), DEFAULT_GATEWAY_URL);
        assert_eq!(config.format(None), OutputFormat::Table);
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"gateway_url": "http://hub:9090", "default_format": "json"}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();

        assert_eq!(config.gateway_url(None), "http://hub:9090");
        assert_eq!(
            config.gateway_url(Some("http://other:9090".to_string())),
            "http://other:9090"
        );
        assert_eq!(config.agent_url(None), DEFAULT_AGENT_URL);
        assert_eq!(config.format(None), OutputFormat::Json);
        assert_eq!(config.format(Some(OutputFormat::Table)), OutputFormat::Table);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(Config::load_from(file.path()).is_err());
    }
}
