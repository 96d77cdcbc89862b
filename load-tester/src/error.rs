//! Error types for the load tester.
//!
//! Only [`TransportError::is_transient`] failures are retried. Everything else ends
//! the run.
use crate::record::Category;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Failed to load tokenizer from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid JSON: {source}")]
    InvalidJson {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}:{line}: missing required field `{field}`")]
    MissingField {
        path: PathBuf,
        line: usize,
        field: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one endpoint is required")]
    NoEndpoints,

    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Invalid rate {0}: must be 0 or a positive rate with a representable period")]
    InvalidRate(f64),

    #[error("max_retries must allow at least one attempt")]
    ZeroAttempts,

    #[error("Connection pool limit per host must be at least 1")]
    ZeroPoolLimit,

    #[error("Connection pool limit per host {0} exceeds the semaphore maximum")]
    PoolLimitTooLarge(usize),

    #[error("Result channel capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("Result channel capacity {0} exceeds the semaphore maximum")]
    ChannelCapacityTooLarge(usize),

    #[error("Invalid weight {weight} for category {category}")]
    InvalidWeight { category: Category, weight: f64 },

    #[error("No category has both a positive weight and at least one prompt")]
    NoEligibleCategory,
}

/// Failure of a single `/generate` call.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection reset: {0}")]
    Reset(String),

    #[error("Server disconnected: {0}")]
    Disconnected(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Connectivity failures that a later attempt may not hit.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Reset(_) | TransportError::Disconnected(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Response is missing `text[0]`: {0}")]
    MissingText(String),

    #[error("Result channel closed after {received} of {expected} results")]
    ResultsMissing { expected: usize, received: usize },
}

/// Anything that aborts an experiment.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Failed to write report: {0}")]
    Report(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_failures_are_transient() {
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Reset("reset by peer".into()).is_transient());
        assert!(TransportError::Disconnected("closed".into()).is_transient());

        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!TransportError::Status {
            status: 500,
            body: String::new()
        }
        .is_transient());
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!TransportError::MalformedBody(json_err).is_transient());
        assert!(!TransportError::Other("bad uri".into()).is_transient());
    }

    #[test]
    fn request_error_names_endpoint() {
        let err = RunError::Request {
            endpoint: "http://10.0.0.1/generate".into(),
            source: TransportError::Status {
                status: 503,
                body: "overloaded".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Request to http://10.0.0.1/generate failed: Unexpected status 503: overloaded"
        );
    }
}
