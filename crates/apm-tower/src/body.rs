//! Streamed body wrapper that ends the transaction on termination.
//!
//! [`InstrumentedBody`] forwards chunks from the application's lazy body and
//! ends the owning transaction the first time the body terminates: when the
//! inner iterator is exhausted or yields an error. A body dropped before it
//! terminates ends the transaction on drop.

use crate::handler::BodyStream;
use crate::transaction::ActiveTransaction;
use bytes::Bytes;
use std::fmt;
use std::iter::FusedIterator;
use tower::BoxError;

/// A streamed response body tied to an open transaction.
///
/// After termination the body is fused: further calls to `next` return
/// `None` and the inner iterator has already been dropped.
pub struct InstrumentedBody {
    // Dropped before `transaction`, so the inner body is closed first.
    inner: Option<BodyStream>,
    transaction: Option<ActiveTransaction>,
}

impl InstrumentedBody {
    /// Wraps a streamed body.
    pub fn new(inner: BodyStream, transaction: ActiveTransaction) -> Self {
        Self {
            inner: Some(inner),
            transaction: Some(transaction),
        }
    }

    /// Whether the transaction has been ended.
    pub fn is_finished(&self) -> bool {
        self.transaction.is_none()
    }

    fn finish(&mut self) {
        self.inner = None;
        self.transaction = None;
    }
}

impl Iterator for InstrumentedBody {
    type Item = Result<Bytes, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;

        match inner.next() {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(err)) => {
                if let Some(transaction) = self.transaction.as_mut() {
                    transaction.fail(&*err);
                }
                self.finish();
                Some(Err(err))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            Some(inner) => (0, inner.size_hint().1),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for InstrumentedBody {}

impl fmt::Debug for InstrumentedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedBody")
            .field("transaction", &self.transaction.as_ref().map(|t| t.id()))
            .finish_non_exhaustive()
    }
}
