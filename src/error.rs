//! Error types for alpha-batch
//!
//! This module separates three layers of failure:
//! - [`Error`] - setup and batch-level errors (configuration, invalid batches, fatal output I/O)
//! - [`ApiError`] - a single failed attempt against the simulation API
//! - [`FailureKind`] - the per-job failure taxonomy recorded in a [`JobResult`](crate::types::JobResult)
//!
//! Per-job failures never surface as [`Error`]; they become failed job results and the
//! batch carries on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for alpha-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for alpha-batch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch.concurrency")
        key: Option<String>,
    },

    /// A job in the batch failed validation before anything was submitted
    #[error("invalid job {correlation_id}: {reason}")]
    InvalidJob {
        /// Correlation id of the offending job
        correlation_id: String,
        /// Why the job was rejected
        reason: String,
    },

    /// Two jobs in one batch share a correlation id
    #[error("duplicate correlation id in batch: {0}")]
    DuplicateCorrelationId(String),

    /// Writing the CSV or log output failed; fatal for the batch
    #[error("failed to write batch output {path}: {source}")]
    Sink {
        /// The output file being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Sign-in against the simulation API was refused
    #[error("authentication failed: {0}")]
    Auth(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a config key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// One failed attempt against the simulation API
///
/// Produced by [`AlphaApi`](crate::remote::AlphaApi) implementations and classified by
/// [`IsRetryable`](crate::retry::IsRetryable) inside the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API answered 429 (or an equivalent throttling response)
    #[error("rate limited (HTTP {status})")]
    RateLimited {
        /// HTTP status that signalled throttling
        status: u16,
    },

    /// Connection failure, timeout, or server-side 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// Credentials were refused; retrying with the same session cannot succeed
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// The response did not have the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The API refused the job itself (non-auth 4xx or a remote job error)
    #[error("rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status, or 200 when the rejection came inside a poll body
        status: u16,
        /// Message reported by the API
        message: String,
    },
}

impl ApiError {
    /// The job-level failure kind this attempt error maps to
    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::RateLimited { .. } => FailureKind::RateLimited,
            ApiError::Transient(_) => FailureKind::Transient,
            ApiError::AuthExpired(_) => FailureKind::AuthExpired,
            ApiError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ApiError::Rejected { .. } => FailureKind::Rejected,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::MalformedResponse(e.to_string())
        } else {
            ApiError::Transient(e.to_string())
        }
    }
}

/// Why a job ended without a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or connection failure
    Transient,
    /// Throttled by the API
    RateLimited,
    /// A retryable error persisted through every attempt of one step
    RetryExhausted,
    /// The session credentials are no longer accepted
    AuthExpired,
    /// Unexpected payload shape
    MalformedResponse,
    /// The API refused the job
    Rejected,
}

impl FailureKind {
    /// Stable lowercase name used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::RetryExhausted => "retry_exhausted",
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
