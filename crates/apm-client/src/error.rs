//! Error types for collector clients.

use crate::collector::TransactionId;
use thiserror::Error;

/// Errors that can occur while constructing a collector client.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InitError {
    /// The trace exporter could not be built.
    #[error("failed to build trace exporter")]
    Exporter(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The collector refused the configuration.
    #[error("invalid collector configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors that can occur while reporting to a collector.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The transaction was never begun or has already ended.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// The collector could not accept the report.
    #[error("collector unavailable: {0}")]
    Unavailable(String),
}
