//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state commit failed: {0}")]
    Commit(String),

    #[error("cannot open table: {0}")]
    Table(String),

    /// Read or write failure inside an open table.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("cannot encode {record}: {reason}")]
    Encode { record: &'static str, reason: String },

    /// A persisted value no longer matches its record type.
    #[error("corrupt {record} entry: {reason}")]
    Decode { record: &'static str, reason: String },
}
