//! Rollout error types
//!
//! Only I/O-adjacent steps fail: attach/detach, metric fetch and the store.
//! Health breaches are not errors; they drive the execution to RolledBack.

use thiserror::Error;

/// Failure of the external policy applier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("APPLY/REJECTED: {0}")]
    Rejected(String),

    #[error("APPLY/UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("APPLY/NOT_FOUND: {0}")]
    NotFound(String),
}

/// Failure to fetch a health sample. Retried within the polling window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("METRICS/UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("METRICS/NO_DATA: {0}")]
    NoData(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("STORE/IO: {0}")]
    Io(String),

    #[error("STORE/SERIALIZATION: {0}")]
    Serialization(String),

    #[error("STORE/TARGET_BUSY: target {target} has active execution {execution_id}")]
    TargetBusy { target: String, execution_id: String },

    #[error("STORE/LOCK: {0}")]
    Lock(String),

    #[error("STORE/INVALID_ID: {0} is not an execution id")]
    InvalidId(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RolloutError {
    #[error("ROLLOUT/NOT_FOUND: {0}")]
    NotFound(String),

    #[error("ROLLOUT/TARGET_BUSY: target {target} has active execution {execution_id}")]
    TargetBusy { target: String, execution_id: String },

    #[error("ROLLOUT/INVALID_REQUEST: {0}")]
    InvalidRequest(String),

    #[error("ROLLOUT/FINISHED: execution {0} is already terminal")]
    AlreadyFinished(String),

    #[error("ROLLOUT/ALREADY_RUNNING: execution {0} is already being driven")]
    AlreadyRunning(String),

    #[error("ROLLOUT/NOT_PENDING: execution {id} is {state}; approvals are only accepted while pending")]
    NotPending { id: String, state: String },

    #[error("ROLLOUT/CONFIG: {0}")]
    Config(String),

    #[error("ROLLOUT/APPLY: {0}")]
    Apply(#[from] ApplyError),

    #[error("ROLLOUT/STORE: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RolloutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TargetBusy {
                target,
                execution_id,
            } => RolloutError::TargetBusy {
                target,
                execution_id,
            },
            other => RolloutError::Store(other),
        }
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
