//! Error taxonomy for the pipeline
//!
//! Per-record and per-batch failures are always handled locally (dropped or
//! retried); only [`ConfigError`] stops a process.

use thiserror::Error;

/// Failure delivering a batch over a transport (agent to hub, sink to backend)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Timeout, connection failure or 5xx-equivalent: retry with backoff
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Receiver rejected the payload as invalid: never retried
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Classify an HTTP status code returned by a receiver
    pub fn from_status(status: u16, body: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            408 | 425 | 429 => Some(DeliveryError::Transient(format!("{status}: {body}"))),
            500..=599 => Some(DeliveryError::Transient(format!("{status}: {body}"))),
            _ => Some(DeliveryError::Permanent(format!("{status}: {body}"))),
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            DeliveryError::Permanent(err.to_string())
        } else {
            DeliveryError::Transient(err.to_string())
        }
    }
}

/// Map a receiver response to a delivery result, reading the body only on failure
pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    match DeliveryError::from_status(status, truncate(&body, 256)) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Rejection at the gateway boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Backpressure ceiling exceeded; the agent should retry later
    #[error("backpressure ceiling exceeded: requested {requested} bytes, ceiling {ceiling} bytes")]
    Capacity { requested: u64, ceiling: u64 },
    /// Undecodable or structurally invalid batch; never retried
    #[error("malformed batch: {0}")]
    Malformed(String),
}

impl AdmissionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::Capacity { .. })
    }
}

/// Fatal startup configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cluster identity attribute `{0}` is not configured")]
    MissingIdentity(&'static str),
    #[error("invalid sink definition `{name}`: {reason}")]
    InvalidSink { name: String, reason: String },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(DeliveryError::from_status(204, ""), None);
        assert!(DeliveryError::from_status(503, "busy")
            .unwrap()
            .is_retryable());
        assert!(DeliveryError::from_status(429, "slow down")
            .unwrap()
            .is_retryable());
        assert!(!DeliveryError::from_status(400, "bad")
            .unwrap()
            .is_retryable());
        assert!(!DeliveryError::from_status(413, "too large")
            .unwrap()
            .is_retryable());
    }

    #[test]
    fn test_admission_retryability() {
        let capacity = AdmissionError::Capacity {
            requested: 10,
            ceiling: 5,
        };
        assert!(capacity.is_retryable());
        assert!(!AdmissionError::Malformed("x".into()).is_retryable());
    }
}
