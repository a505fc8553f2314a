//! Deployment gate errors.

use std::time::Duration;

use thiserror::Error;

use sloguard_alarm::AlarmError;
use sloguard_state::StateError;

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    /// Another deployment is in flight for the environment.
    #[error("environment {0} is busy with another deployment")]
    Busy(String),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("no deployment in flight for {0}")]
    NoDeployment(String),

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("alarm error: {0}")]
    Alarm(#[from] AlarmError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
