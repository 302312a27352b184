pub mod config;
pub mod message;
pub mod sendmail;

pub use config::*;
pub use message::*;
pub use sendmail::*;

/// Delivers a finished batch's report somewhere a human will see it.
///
/// Callers treat any error as non-fatal: it is logged and the batch result
/// stands.
pub trait Notifier: Send + Sync {
    fn deliver(&self, config: &NotifierConfig, body: &str) -> anyhow::Result<()>;
}
