//! Error types for handler installation.

use thiserror::Error;

/// Errors raised by an [`InstallSite`](crate::InstallSite) while installing a
/// handler.
///
/// These never leave the guard; they become [`WrapOutcome::Failed`](crate::WrapOutcome::Failed)
/// plus a log line.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WrapError {
    /// The site refused the new handler.
    #[error("install site rejected the handler: {0}")]
    Rejected(String),

    /// The site failed while swapping handlers.
    #[error("failed to install handler")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync>),
}
