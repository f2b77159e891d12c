//! Per-request transaction guard.

use crate::context::RequestContext;
use crate::handler::Request;
use apm_client::{Client, ExceptionInfo, TransactionId, TransactionResult};
use http::StatusCode;

/// Transaction type recorded for every request.
pub const TRANSACTION_TYPE: &str = "request";

/// Context key under which the request snapshot is attached.
const REQUEST_CONTEXT_KEY: &str = "request";

/// An open request transaction.
///
/// Dropping the guard ends the transaction, so every path out of a request
/// (normal return, error, abandoned body, panic) ends it exactly once.
///
/// The result follows two rules: the first observed status wins, and a
/// failure forces `error` and locks the result against later writes.
#[derive(Debug)]
pub struct ActiveTransaction {
    client: Client,
    id: TransactionId,
    result: Option<TransactionResult>,
    failed: bool,
}

impl ActiveTransaction {
    /// Begins a transaction and names it.
    pub fn begin(client: &Client, name: &str) -> Self {
        let id = client.collector().begin_transaction(TRANSACTION_TYPE);
        client.collector().set_transaction_name(id, name, false);

        Self {
            client: client.clone(),
            id,
            result: None,
            failed: false,
        }
    }

    /// The collector-side identifier.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The result recorded so far.
    pub fn result(&self) -> Option<TransactionResult> {
        self.result
    }

    /// Attaches a snapshot of the request.
    ///
    /// Snapshot or collector failures are logged and otherwise ignored; they
    /// never reach the request path.
    pub fn attach_context(&self, request: &Request) {
        let value = match RequestContext::capture(request).and_then(|ctx| ctx.to_value()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    target: "apm_request",
                    transaction = %self.id,
                    error = %e,
                    "Failed to capture request context"
                );
                return;
            }
        };

        if let Err(e) = self
            .client
            .collector()
            .set_context(self.id, REQUEST_CONTEXT_KEY, value)
        {
            tracing::warn!(
                target: "apm_request",
                transaction = %self.id,
                error = %e,
                "Collector rejected request context"
            );
        }
    }

    /// Records the response status unless a result is already set.
    pub fn record_status(&mut self, status: StatusCode) {
        if self.result.is_some() {
            return;
        }

        let result = TransactionResult::from_status(status.as_u16());
        self.result = Some(result);
        self.client
            .collector()
            .set_transaction_result(self.id, result, false);
    }

    /// Captures an error against this transaction and forces the `error` result.
    ///
    /// Only the first failure is reported.
    pub fn fail<E>(&mut self, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        if self.failed {
            return;
        }
        self.failed = true;

        let exception = ExceptionInfo::from_error(err);
        if let Err(e) = self
            .client
            .collector()
            .capture_exception(Some(self.id), &exception)
        {
            tracing::debug!(
                target: "apm_request",
                transaction = %self.id,
                error = %e,
                "Dropped exception report"
            );
        }

        self.result = Some(TransactionResult::Error);
        self.client
            .collector()
            .set_transaction_result(self.id, TransactionResult::Error, true);
    }

    /// Ends the transaction now.
    pub fn finish(self) {}
}

impl Drop for ActiveTransaction {
    fn drop(&mut self) {
        self.client.collector().end_transaction(self.id);
    }
}
