//! Alarm evaluator errors.

use thiserror::Error;

use sloguard_state::StateError;

pub type AlarmResult<T> = Result<T, AlarmError>;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
