//! Resource tagging with cluster identity
//!
//! Every record leaving an edge cluster carries the cluster's identity.
//! Workload-supplied attributes win on key collision, except for the
//! `cluster.*` namespace which only the tagger may write.

use crate::error::ConfigError;
use crate::models::{attributes, SignalRecord};
use std::collections::BTreeMap;

/// Process-configured identity of an edge cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    name: String,
    region: String,
    environment: String,
    extra: BTreeMap<String, String>,
}

impl ClusterIdentity {
    /// Build an identity; blank fields are a fatal configuration error
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        environment: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = required(name.into(), attributes::CLUSTER_NAME)?;
        let region = required(region.into(), attributes::CLUSTER_REGION)?;
        let environment = required(environment.into(), attributes::CLUSTER_ENVIRONMENT)?;

        Ok(Self {
            name,
            region,
            environment,
            extra: BTreeMap::new(),
        })
    }

    /// Add an additional `cluster.<key>` attribute (e.g. zone, provider)
    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        let key = if key.starts_with(attributes::CLUSTER_PREFIX) {
            key.to_string()
        } else {
            format!("{}{}", attributes::CLUSTER_PREFIX, key)
        };
        self.extra.insert(key, value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        [
            (attributes::CLUSTER_NAME, self.name.as_str()),
            (attributes::CLUSTER_REGION, self.region.as_str()),
            (attributes::CLUSTER_ENVIRONMENT, self.environment.as_str()),
        ]
        .into_iter()
        .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

fn required(value: String, field: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingIdentity(field));
    }
    Ok(trimmed.to_string())
}

/// Merges cluster identity into record attributes
#[derive(Debug, Clone)]
pub struct ResourceTagger {
    identity: ClusterIdentity,
}

impl ResourceTagger {
    pub fn new(identity: ClusterIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    /// Tag a record. Pure and total: no I/O, never fails.
    pub fn tag(&self, mut record: SignalRecord) -> SignalRecord {
        // Workloads must not spoof cluster identity
        record
            .resource_attributes
            .retain(|key, _| !key.starts_with(attributes::CLUSTER_PREFIX));

        for (key, value) in self.identity.entries() {
            record
                .resource_attributes
                .insert(key.to_string(), value.to_string());
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn tagger() -> ResourceTagger {
        ResourceTagger::new(ClusterIdentity::new("edge-a", "eu-west-1", "prod").unwrap())
    }

    #[test]
    fn test_missing_identity_is_fatal() {
        assert_eq!(
            ClusterIdentity::new("", "eu", "prod"),
            Err(ConfigError::MissingIdentity(attributes::CLUSTER_NAME))
        );
        assert_eq!(
            ClusterIdentity::new("edge", "  ", "prod"),
            Err(ConfigError::MissingIdentity(attributes::CLUSTER_REGION))
        );
        assert_eq!(
            ClusterIdentity::new("edge", "eu", ""),
            Err(ConfigError::MissingIdentity(attributes::CLUSTER_ENVIRONMENT))
        );
    }

    #[test]
    fn test_tag_adds_identity() {
        let record = tagger().tag(SignalRecord::metric("cpu", 0.3, "cores"));
        assert_eq!(record.attribute(attributes::CLUSTER_NAME), Some("edge-a"));
        assert_eq!(record.attribute(attributes::CLUSTER_REGION), Some("eu-west-1"));
        assert_eq!(record.attribute(attributes::CLUSTER_ENVIRONMENT), Some("prod"));
    }

    #[test]
    fn test_workload_attributes_win_outside_cluster_namespace() {
        let record = SignalRecord::log("hi", Severity::Info)
            .with_attribute(attributes::NAMESPACE, "payments")
            .with_attribute(attributes::POD, "api-7");
        let tagged = tagger().tag(record);
        assert_eq!(tagged.attribute(attributes::NAMESPACE), Some("payments"));
        assert_eq!(tagged.attribute(attributes::POD), Some("api-7"));
    }

    #[test]
    fn test_cluster_keys_cannot_be_spoofed() {
        let record = SignalRecord::log("hi", Severity::Info)
            .with_attribute(attributes::CLUSTER_NAME, "someone-else")
            .with_attribute("cluster.zone", "fake-zone");
        let tagged = tagger().tag(record);
        assert_eq!(tagged.attribute(attributes::CLUSTER_NAME), Some("edge-a"));
        assert_eq!(tagged.attribute("cluster.zone"), None);
    }

    #[test]
    fn test_extra_identity_attributes() {
        let identity = ClusterIdentity::new("edge-b", "us-east-2", "staging")
            .unwrap()
            .with_extra("zone", "us-east-2a")
            .with_extra("cluster.provider", "eks");
        let tagged = ResourceTagger::new(identity)
            .tag(SignalRecord::metric("m", 1.0, "").with_attribute("cluster.zone", "nope"));
        assert_eq!(tagged.attribute("cluster.zone"), Some("us-east-2a"));
        assert_eq!(tagged.attribute("cluster.provider"), Some("eks"));
    }

    #[test]
    fn test_tag_is_idempotent() {
        let t = tagger();
        let once = t.tag(SignalRecord::metric("m", 1.0, "").with_attribute("a", "b"));
        let twice = t.tag(once.clone());
        assert_eq!(once, twice);
    }
}
