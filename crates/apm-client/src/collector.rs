//! The collector capability and the values that cross it.

use crate::error::CaptureError;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identity of a transaction within a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome tag recorded on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionResult {
    /// Status below 400.
    Success,
    /// Status in 400..=499.
    ClientError,
    /// Status 500 or above.
    ServerError,
    /// The handler or its body raised.
    Error,
}

impl TransactionResult {
    /// Maps a numeric HTTP status to a result tag.
    ///
    /// ```
    /// use apm_client::TransactionResult;
    ///
    /// assert_eq!(TransactionResult::from_status(200), TransactionResult::Success);
    /// assert_eq!(TransactionResult::from_status(404), TransactionResult::ClientError);
    /// assert_eq!(TransactionResult::from_status(503), TransactionResult::ServerError);
    /// ```
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=399 => TransactionResult::Success,
            400..=499 => TransactionResult::ClientError,
            _ => TransactionResult::ServerError,
        }
    }

    /// Returns the wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionResult::Success => "success",
            TransactionResult::ClientError => "client_error",
            TransactionResult::ServerError => "server_error",
            TransactionResult::Error => "error",
        }
    }
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an error suitable for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    /// Type name of the error, when it was captured through its concrete type.
    pub kind: Option<String>,
    /// The error's `Display` message.
    pub message: String,
    /// Messages of the `source()` chain, outermost first.
    pub causes: Vec<String>,
}

impl ExceptionInfo {
    /// Captures an error and its source chain.
    ///
    /// `kind` is the type name of `E`. Trait objects such as a boxed error
    /// hide the concrete type, so they leave `kind` empty.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let type_name = std::any::type_name::<E>();
        let kind = (!type_name.starts_with("dyn ")).then(|| type_name.to_string());

        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind,
            message: err.to_string(),
            causes,
        }
    }
}

/// Capability surface of a telemetry collector.
///
/// Implementations must tolerate concurrent calls for different transactions
/// from many threads. Calls are expected to be non-blocking or bounded; the
/// instrumentation layer makes them on the request path.
///
/// Name and result writes carry an `override_existing` flag: when `false`, a
/// value already present on the transaction is kept.
pub trait Collector: Send + Sync + 'static {
    /// Begins a transaction of the given type.
    fn begin_transaction(&self, transaction_type: &str) -> TransactionId;

    /// Names a transaction.
    fn set_transaction_name(&self, id: TransactionId, name: &str, override_existing: bool);

    /// Tags a transaction's result.
    fn set_transaction_result(
        &self,
        id: TransactionId,
        result: TransactionResult,
        override_existing: bool,
    );

    /// Attaches a context object under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector cannot accept the context.
    fn set_context(
        &self,
        id: TransactionId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CaptureError>;

    /// Reports an exception, against a transaction when one is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be accepted.
    fn capture_exception(
        &self,
        id: Option<TransactionId>,
        exception: &ExceptionInfo,
    ) -> Result<(), CaptureError>;

    /// Ends a transaction.
    fn end_transaction(&self, id: TransactionId);

    /// Flushes buffered telemetry, if the collector buffers.
    fn flush(&self) {}
}
