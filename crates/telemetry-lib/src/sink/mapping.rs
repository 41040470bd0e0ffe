//! Static per-sink attribute rename and subset

use crate::models::SignalRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Backend-specific view of `resource_attributes`
///
/// `include` is an allow-list over source keys; `rename` then maps the kept
/// keys to the backend's native tag names (e.g. `cluster.name` -> `cluster`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

impl AttributeMapping {
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }

    pub fn include<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.rename.is_empty() && self.include.is_none()
    }

    pub fn map_attributes(&self, attributes: &HashMap<String, String>) -> HashMap<String, String> {
        attributes
            .iter()
            .filter(|(key, _)| {
                self.include
                    .as_ref()
                    .map_or(true, |allowed| allowed.iter().any(|a| a == *key))
            })
            .map(|(key, value)| {
                let key = self.rename.get(key).unwrap_or(key);
                (key.clone(), value.clone())
            })
            .collect()
    }

    /// Copy of `record` with mapped attributes; the original is untouched
    pub fn apply(&self, record: &SignalRecord) -> SignalRecord {
        if self.is_identity() {
            return record.clone();
        }
        SignalRecord {
            timestamp: record.timestamp,
            resource_attributes: self.map_attributes(&record.resource_attributes),
            payload: record.payload.clone(),
        }
    }
}
