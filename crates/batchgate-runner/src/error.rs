use std::path::PathBuf;

use batchgate_core::{CoreError, QueueError};
use thiserror::Error;

/// Conditions that end an invocation before any batch work happens.
#[derive(Debug, Error)]
pub enum Fatal {
    #[error("Configuration is missing important keys")]
    MissingKeys,
    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),
    #[error("cannot create {name} {}: {source}", .path.display())]
    Directory {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run_interval `{0}` is not a relative time offset")]
    InvalidInterval(String),
    #[error("today `{0}` is not a valid Y-m-d date")]
    InvalidToday(String),
    #[error("invalid run gate record: {0}")]
    InvalidRecord(CoreError),
    #[error("state store {store} unavailable: {cause:#}")]
    Store { store: String, cause: anyhow::Error },
    #[error("cannot load configuration: {0:#}")]
    ConfigFile(anyhow::Error),
}

impl Fatal {
    /// Maps a gate-record problem: absent fields are the classic
    /// missing-keys error, unparseable values keep their detail.
    pub fn from_record(err: CoreError) -> Self {
        match err {
            CoreError::MissingKeys => Fatal::MissingKeys,
            other => Fatal::InvalidRecord(other),
        }
    }

    /// Process exit path for fatal errors: plain-text message, status 1.
    pub fn exit(self) -> ! {
        tracing::error!(error = %self, "fatal");
        eprintln!("{self}");
        std::process::exit(1)
    }
}

/// The gate refused this invocation; nothing was changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refusal {
    pub message: String,
}

impl Refusal {
    /// Process exit path for refusals: plain-text message, status 0.
    pub fn exit(self) -> ! {
        tracing::info!(message = %self.message, "refused");
        println!("{}", self.message);
        std::process::exit(0)
    }
}

/// Recoverable failures returned from queue and log operations; the caller
/// decides whether to retry, skip or abort.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("state store: {0:#}")]
    Store(anyhow::Error),
    #[error("audit log: {0:#}")]
    Audit(anyhow::Error),
}
