//! In-memory collector that records every call.

use crate::collector::{Collector, ExceptionInfo, TransactionId, TransactionResult};
use crate::error::CaptureError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single call made against a [`RecordingCollector`].
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    /// `begin_transaction`
    Begin {
        /// Assigned identifier.
        id: TransactionId,
        /// Transaction type.
        transaction_type: String,
    },
    /// `set_transaction_name`
    SetName {
        /// Target transaction.
        id: TransactionId,
        /// Requested name.
        name: String,
        /// Whether an existing name may be replaced.
        override_existing: bool,
    },
    /// `set_transaction_result`
    SetResult {
        /// Target transaction.
        id: TransactionId,
        /// Requested result.
        result: TransactionResult,
        /// Whether an existing result may be replaced.
        override_existing: bool,
    },
    /// `set_context`
    SetContext {
        /// Target transaction.
        id: TransactionId,
        /// Context key.
        key: String,
        /// Context value.
        value: serde_json::Value,
    },
    /// `capture_exception`
    Capture {
        /// Target transaction, if any.
        id: Option<TransactionId>,
        /// Reported exception.
        exception: ExceptionInfo,
    },
    /// `end_transaction`
    End {
        /// Target transaction.
        id: TransactionId,
    },
}

/// Folded view of one transaction's recorded calls.
///
/// Name and result follow collector semantics: a non-overriding write is
/// ignored when a value is already present.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTransaction {
    /// Transaction identifier.
    pub id: TransactionId,
    /// Transaction type.
    pub transaction_type: String,
    /// Effective name.
    pub name: Option<String>,
    /// Effective result.
    pub result: Option<TransactionResult>,
    /// Attached context objects.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Exceptions captured against this transaction.
    pub exceptions: Vec<ExceptionInfo>,
    /// Number of `end_transaction` calls seen.
    pub end_count: usize,
}

impl RecordedTransaction {
    /// Whether the transaction was ended.
    pub fn is_ended(&self) -> bool {
        self.end_count > 0
    }
}

/// Collector that keeps every call in memory.
///
/// # Example
///
/// ```
/// use apm_client::{Collector, RecordingCollector, TransactionResult};
///
/// let recorder = RecordingCollector::new();
/// let id = recorder.begin_transaction("request");
/// recorder.set_transaction_result(id, TransactionResult::Success, false);
/// recorder.end_transaction(id);
///
/// let txs = recorder.transactions();
/// assert_eq!(txs[0].result, Some(TransactionResult::Success));
/// assert_eq!(txs[0].end_count, 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<CollectorEvent>>,
    fail_captures: AtomicBool,
}

impl RecordingCollector {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `capture_exception` calls fail, or succeed again.
    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of all recorded calls, in order.
    pub fn events(&self) -> Vec<CollectorEvent> {
        self.events.lock().clone()
    }

    /// Discards all recorded calls.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Returns exceptions captured outside any transaction.
    pub fn standalone_exceptions(&self) -> Vec<ExceptionInfo> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CollectorEvent::Capture {
                    id: None,
                    exception,
                } => Some(exception.clone()),
                _ => None,
            })
            .collect()
    }

    /// Folds recorded calls into one view per transaction, in begin order.
    pub fn transactions(&self) -> Vec<RecordedTransaction> {
        let events = self.events.lock();
        let mut transactions: Vec<RecordedTransaction> = Vec::new();

        for event in events.iter() {
            match event {
                CollectorEvent::Begin {
                    id,
                    transaction_type,
                } => transactions.push(RecordedTransaction {
                    id: *id,
                    transaction_type: transaction_type.clone(),
                    name: None,
                    result: None,
                    context: BTreeMap::new(),
                    exceptions: Vec::new(),
                    end_count: 0,
                }),
                CollectorEvent::SetName {
                    id,
                    name,
                    override_existing,
                } => {
                    if let Some(tx) = find(&mut transactions, *id)
                        && (*override_existing || tx.name.is_none())
                    {
                        tx.name = Some(name.clone());
                    }
                }
                CollectorEvent::SetResult {
                    id,
                    result,
                    override_existing,
                } => {
                    if let Some(tx) = find(&mut transactions, *id)
                        && (*override_existing || tx.result.is_none())
                    {
                        tx.result = Some(*result);
                    }
                }
                CollectorEvent::SetContext { id, key, value } => {
                    if let Some(tx) = find(&mut transactions, *id) {
                        tx.context.insert(key.clone(), value.clone());
                    }
                }
                CollectorEvent::Capture {
                    id: Some(id),
                    exception,
                } => {
                    if let Some(tx) = find(&mut transactions, *id) {
                        tx.exceptions.push(exception.clone());
                    }
                }
                CollectorEvent::Capture { id: None, .. } => {}
                CollectorEvent::End { id } => {
                    if let Some(tx) = find(&mut transactions, *id) {
                        tx.end_count += 1;
                    }
                }
            }
        }

        transactions
    }

    fn record(&self, event: CollectorEvent) {
        self.events.lock().push(event);
    }
}

fn find(
    transactions: &mut [RecordedTransaction],
    id: TransactionId,
) -> Option<&mut RecordedTransaction> {
    transactions.iter_mut().find(|tx| tx.id == id)
}

impl Collector for RecordingCollector {
    fn begin_transaction(&self, transaction_type: &str) -> TransactionId {
        let id = TransactionId::new();
        self.record(CollectorEvent::Begin {
            id,
            transaction_type: transaction_type.to_string(),
        });
        id
    }

    fn set_transaction_name(&self, id: TransactionId, name: &str, override_existing: bool) {
        self.record(CollectorEvent::SetName {
            id,
            name: name.to_string(),
            override_existing,
        });
    }

    fn set_transaction_result(
        &self,
        id: TransactionId,
        result: TransactionResult,
        override_existing: bool,
    ) {
        self.record(CollectorEvent::SetResult {
            id,
            result,
            override_existing,
        });
    }

    fn set_context(
        &self,
        id: TransactionId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CaptureError> {
        self.record(CollectorEvent::SetContext {
            id,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn capture_exception(
        &self,
        id: Option<TransactionId>,
        exception: &ExceptionInfo,
    ) -> Result<(), CaptureError> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable(
                "recording collector set to fail".to_string(),
            ));
        }

        self.record(CollectorEvent::Capture {
            id,
            exception: exception.clone(),
        });
        Ok(())
    }

    fn end_transaction(&self, id: TransactionId) {
        self.record(CollectorEvent::End { id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception(message: &str) -> ExceptionInfo {
        ExceptionInfo {
            kind: None,
            message: message.to_string(),
            causes: Vec::new(),
        }
    }

    #[test]
    fn test_non_overriding_result_keeps_first() {
        let recorder = RecordingCollector::new();
        let id = recorder.begin_transaction("request");

        recorder.set_transaction_result(id, TransactionResult::Success, false);
        recorder.set_transaction_result(id, TransactionResult::ServerError, false);

        assert_eq!(
            recorder.transactions()[0].result,
            Some(TransactionResult::Success)
        );
    }

    #[test]
    fn test_overriding_result_replaces() {
        let recorder = RecordingCollector::new();
        let id = recorder.begin_transaction("request");

        recorder.set_transaction_result(id, TransactionResult::Success, false);
        recorder.set_transaction_result(id, TransactionResult::Error, true);

        assert_eq!(
            recorder.transactions()[0].result,
            Some(TransactionResult::Error)
        );
    }

    #[test]
    fn test_name_without_override_keeps_existing() {
        let recorder = RecordingCollector::new();
        let id = recorder.begin_transaction("request");

        recorder.set_transaction_name(id, "nested", true);
        recorder.set_transaction_name(id, "GET /outer", false);

        assert_eq!(recorder.transactions()[0].name.as_deref(), Some("nested"));
    }

    #[test]
    fn test_transactions_are_kept_apart() {
        let recorder = RecordingCollector::new();
        let a = recorder.begin_transaction("request");
        let b = recorder.begin_transaction("request");

        recorder
            .capture_exception(Some(b), &exception("boom"))
            .unwrap();
        recorder.end_transaction(a);
        recorder.end_transaction(b);
        recorder.end_transaction(b);

        let txs = recorder.transactions();
        assert_eq!(txs.len(), 2);
        assert!(txs[0].exceptions.is_empty());
        assert_eq!(txs[0].end_count, 1);
        assert_eq!(txs[1].exceptions.len(), 1);
        assert_eq!(txs[1].end_count, 2);
    }

    #[test]
    fn test_standalone_exceptions() {
        let recorder = RecordingCollector::new();
        recorder.capture_exception(None, &exception("outside")).unwrap();

        assert!(recorder.transactions().is_empty());
        assert_eq!(recorder.standalone_exceptions()[0].message, "outside");
    }

    #[test]
    fn test_fail_captures() {
        let recorder = RecordingCollector::new();
        recorder.fail_captures(true);

        let result = recorder.capture_exception(None, &exception("lost"));

        assert!(matches!(result, Err(CaptureError::Unavailable(_))));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_clear() {
        let recorder = RecordingCollector::new();
        recorder.begin_transaction("request");
        recorder.clear();

        assert!(recorder.events().is_empty());
    }
}
