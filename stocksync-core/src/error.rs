//! Error taxonomy for sync runs.
//!
//! The split mirrors how failures are handled at run time:
//! - [`SourceError`]: a single request against an external source. Transient
//!   failures are retried by the window fetcher, fatal ones are not.
//! - [`FetchError`]: a windowed fetch that could not complete.
//! - [`StoreError`]: the persistence gateway.
//! - [`SyncError`]: what a pipeline stage returns. Discovery failures are fatal
//!   for the run; everything else is recovered at the unit boundary.

use crate::fetch::FetchWindow;
use thiserror::Error;

/// Failure of one request against an external data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("transient source failure{}: {message}", status_suffix(*status))]
    Transient { status: Option<u16>, message: String },

    #[error("source rejected request{}: {message}", status_suffix(*status))]
    Fatal { status: Option<u16>, message: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl SourceError {
    /// Classify a non-success HTTP status.
    ///
    /// Timeouts, throttling and server-side errors are worth retrying;
    /// anything else (404, 400, 401...) will fail the same way again.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 425 | 429 | 500..=599 => SourceError::Transient {
                status: Some(status),
                message,
            },
            _ => SourceError::Fatal {
                status: Some(status),
                message,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }
}

/// Failure of a windowed fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("window {window} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        window: FetchWindow,
        attempts: u32,
        last: SourceError,
    },

    #[error("window {window} failed: {error}")]
    Source {
        window: FetchWindow,
        #[source]
        error: SourceError,
    },

    #[error("in-flight limiter closed while fetching")]
    LimiterClosed,
}

/// Failure inside the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("gateway is not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("invalid value for environment variable {var}: {reason}")]
    Env { var: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error returned by pipeline stages.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("worker for unit '{unit}' failed: {reason}")]
    Worker { unit: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
