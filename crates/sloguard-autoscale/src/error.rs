//! Autoscaling errors.

use thiserror::Error;

use sloguard_core::{ActuationError, ConfigError};

pub type ScalingResult<T> = Result<T, ScalingError>;

#[derive(Debug, Error)]
pub enum ScalingError {
    /// One policy could not contribute this tick. Never aborts the tick.
    #[error("policy {policy} skipped: {reason}")]
    PolicyEvaluation { policy: String, reason: String },

    #[error("invalid cron expression {expr:?}: {reason}")]
    Cron { expr: String, reason: String },

    #[error(transparent)]
    InvalidTarget(#[from] ConfigError),

    #[error("scalable target not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Actuation(#[from] ActuationError),
}
