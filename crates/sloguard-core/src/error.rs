//! Error taxonomy shared across SloGuard subsystems.

use thiserror::Error;

use crate::types::Timestamp;

/// Result type alias for metric resolution.
pub type MetricResult<T> = Result<T, MetricError>;

/// Failures resolving a metric value for one bucket.
///
/// Neither variant is fatal: callers map both onto their missing-data
/// policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    /// A bucket had no samples for one of the series involved.
    #[error("missing data for {metric} in bucket starting at {bucket_start}")]
    MissingData { metric: String, bucket_start: Timestamp },

    /// Arithmetic hit an indeterminate case (non-zero divided by zero).
    #[error("undefined value for {metric} in bucket starting at {bucket_start}")]
    UndefinedMetric { metric: String, bucket_start: Timestamp },
}

/// A call into the runtime collaborator failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("actuation on {target} failed: {reason}")]
pub struct ActuationError {
    pub target: String,
    pub reason: String,
}

impl ActuationError {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Errors loading or validating `sloguard.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid duration {value:?} for {field}")]
    Duration { field: String, value: String },

    #[error("composite {name}: {message}")]
    Expression { name: String, message: String },

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
