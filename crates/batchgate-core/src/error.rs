use thiserror::Error;

/// Problems with the persisted gate record or with configured time values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Configuration is missing important keys")]
    MissingKeys,
    #[error("invalid run status `{0}`")]
    InvalidRunStatus(String),
    #[error("invalid date `{0}`")]
    InvalidDate(String),
    #[error("invalid relative interval `{0}`")]
    InvalidInterval(String),
}

/// Policy violations raised by queue operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("dynamic tasks forbidden: the queue already holds tasks and allow_dynamic_tasks is off")]
    DynamicTasksForbidden,
    #[error("task key not found: {0}")]
    KeyNotFound(String),
}
