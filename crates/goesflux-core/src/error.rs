// crates/goesflux-core/src/error.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::secrets::CredentialError;
use crate::types::Channel;
use crate::upstream::UpstreamFetchError;

/// The fetched series violates the shape the processor relies on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedSeriesError {
    #[error("series contains no samples for the {0} channel")]
    MissingChannel(Channel),

    #[error("{channel} channel has invalid flux {value} at {timestamp}")]
    InvalidFlux {
        channel: Channel,
        timestamp: DateTime<Utc>,
        value: f64,
    },

    #[error("{channel} channel goes backwards in time at {timestamp}")]
    NonMonotonic {
        channel: Channel,
        timestamp: DateTime<Utc>,
    },

    #[error("unrecognized energy band '{0}'")]
    UnknownEnergyBand(String),

    #[error("unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error)]
pub enum SinkWriteError {
    #[error("bucket error: {0}")]
    Bucket(#[from] goesflux_bucket::BucketError),

    #[error("parquet encoding failed: {0}")]
    Encoding(#[from] polars::error::PolarsError),

    #[error("annotation backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("annotation backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("annotation target not found: {0}")]
    TargetNotFound(String),

    #[error("unexpected response from annotation backend: {0}")]
    UnexpectedResponse(String),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("no task registered under '{0}'")]
    UnknownTask(String),

    #[error("task '{0}' registered twice")]
    DuplicateTask(String),

    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[from] UpstreamFetchError),

    #[error("malformed series: {0}")]
    MalformedSeries(#[from] MalformedSeriesError),

    #[error("sink write failed: {0}")]
    SinkWrite(#[from] SinkWriteError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task '{task}' panicked: {message}")]
    TaskPanicked { task: String, message: String },
}

impl ExecutionError {
    /// Stable kind name surfaced in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::UnknownTask(_) => "UnknownTaskError",
            ExecutionError::DuplicateTask(_) => "DuplicateTaskError",
            ExecutionError::InvalidInvocation(_) => "InvalidInvocationError",
            ExecutionError::InvalidPayload(_) => "InvalidPayloadError",
            ExecutionError::UpstreamFetch(_) => "UpstreamFetchError",
            ExecutionError::MalformedSeries(_) => "MalformedSeriesError",
            ExecutionError::SinkWrite(_) => "SinkWriteError",
            ExecutionError::Configuration(_) => "ConfigurationError",
            ExecutionError::TaskPanicked { .. } => "TaskPanicked",
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<ConfigError> for ExecutionError {
    fn from(err: ConfigError) -> Self {
        ExecutionError::Configuration(err.to_string())
    }
}

impl From<CredentialError> for ExecutionError {
    fn from(err: CredentialError) -> Self {
        ExecutionError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
