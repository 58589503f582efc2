//! Error handling for the inference gateway
//!
//! Three layers of errors live here. `PolicyError` describes why a policy
//! document could not be obtained or parsed, `ClientError` describes a failed
//! call to the feature store or the model service, and `GatewayError` is the
//! classified error that request handlers and the policy store surface.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage that talks to an upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Features,
    Inference,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Features => "features",
            Stage::Inference => "inference",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to retrieve or parse a policy document
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy document not found at {address}")]
    NotFound { address: String },

    #[error("access to {address} denied: {source}")]
    Unauthorized {
        address: String,
        #[source]
        source: object_store::Error,
    },

    #[error("malformed policy document: {message}")]
    Malformed { message: String },

    #[error("object store failure fetching {address}: {source}")]
    Store {
        address: String,
        #[source]
        source: object_store::Error,
    },

    #[error("I/O failure reading {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Failure of a single upstream HTTP call
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("{message}")]
    Rejected { message: String },
}

impl ClientError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// Classified gateway error
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("policy fetch from {address} failed: {source}")]
    PolicyFetchFailed {
        address: String,
        #[source]
        source: PolicyError,
    },

    #[error("policy bootstrap from {address} failed: {source}")]
    PolicyBootstrapFailed {
        address: String,
        #[source]
        source: PolicyError,
    },

    #[error("{stage} upstream unavailable: {source}")]
    UpstreamUnavailable {
        stage: Stage,
        #[source]
        source: ClientError,
    },

    #[error("invalid request: {field} - {message}")]
    InvalidRequest { field: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn policy_fetch(address: impl Into<String>, source: PolicyError) -> Self {
        Self::PolicyFetchFailed {
            address: address.into(),
            source,
        }
    }

    pub fn policy_bootstrap(address: impl Into<String>, source: PolicyError) -> Self {
        Self::PolicyBootstrapFailed {
            address: address.into(),
            source,
        }
    }

    pub fn upstream(stage: Stage, source: ClientError) -> Self {
        Self::UpstreamUnavailable { stage, source }
    }

    pub fn invalid_request(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Upstream stage that caused the failure, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            GatewayError::UpstreamUnavailable { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_names_its_stage() {
        let err = GatewayError::upstream(Stage::Features, ClientError::TimedOut { after_ms: 250 });
        assert_eq!(err.stage(), Some(Stage::Features));
        assert!(err.to_string().starts_with("features upstream unavailable"));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn bootstrap_error_keeps_source() {
        use std::error::Error;

        let err = GatewayError::policy_bootstrap(
            "s3://bucket/key",
            PolicyError::NotFound {
                address: "s3://bucket/key".into(),
            },
        );
        assert!(err.source().is_some());
        assert!(err.stage().is_none());
        assert!(err.to_string().contains("policy bootstrap"));
    }
}
