//! The instrumented handler.

use crate::body::InstrumentedBody;
use crate::handler::{Handler, Request, ResponseBody, StartResponse};
use crate::transaction::ActiveTransaction;
use apm_client::Client;
use http::{HeaderMap, StatusCode};
use tower::BoxError;

/// Handler wrapper that reports each invocation as a transaction.
///
/// The wrapper:
/// 1. Begins a transaction named `"{method} {path}"` and attaches the request
///    snapshot
/// 2. Interposes on the response-start callback to record the status
/// 3. Invokes the inner handler with the original request
/// 4. Ends the transaction once the response is finished, which for a
///    streamed body means when the body terminates
///
/// Errors from the inner handler or its body are captured, force the `error`
/// result and are returned unchanged.
#[derive(Clone, Debug)]
pub struct ApmService<H> {
    inner: H,
    client: Client,
}

impl<H> ApmService<H> {
    /// Wraps `inner`, reporting through `client`.
    pub fn new(inner: H, client: Client) -> Self {
        Self { inner, client }
    }

    /// The wrapped handler.
    pub fn get_ref(&self) -> &H {
        &self.inner
    }

    /// The client transactions are reported through.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Unwraps the inner handler.
    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H> Handler for ApmService<H>
where
    H: Handler,
{
    fn call(
        &self,
        request: Request,
        start_response: &mut dyn StartResponse,
    ) -> Result<ResponseBody, BoxError> {
        let name = transaction_name(&request);
        let mut transaction = ActiveTransaction::begin(&self.client, &name);
        transaction.attach_context(&request);

        let result = {
            let mut observer = StatusObserver {
                inner: start_response,
                transaction: &mut transaction,
            };
            self.inner.call(request, &mut observer)
        };

        match result {
            Ok(ResponseBody::Materialized(chunks)) => {
                transaction.finish();
                Ok(ResponseBody::Materialized(chunks))
            }
            Ok(ResponseBody::Streamed(stream)) => Ok(ResponseBody::Streamed(Box::new(
                InstrumentedBody::new(stream, transaction),
            ))),
            Err(err) => {
                tracing::debug!(
                    target: "apm_request",
                    transaction = %transaction.id(),
                    error = %err,
                    "Handler raised before producing a body"
                );
                transaction.fail(&*err);
                transaction.finish();
                Err(err)
            }
        }
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

fn transaction_name(request: &Request) -> String {
    format!("{} {}", request.method, request.path)
}

/// Records the status on its way to the host's callback.
struct StatusObserver<'a> {
    inner: &'a mut dyn StartResponse,
    transaction: &'a mut ActiveTransaction,
}

impl StartResponse for StatusObserver<'_> {
    fn start_response(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.transaction.record_status(status);
        self.inner.start_response(status, headers);
    }
}
