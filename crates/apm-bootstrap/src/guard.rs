//! Wrap-once installation of the instrumented handler.

use crate::error::WrapError;
use apm_client::Client;
use apm_tower::{ApmLayer, Handler, SharedHandler};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tower::Layer;

/// Where the host keeps the handler it dispatches requests to.
pub trait InstallSite: Send + Sync {
    /// The handler currently installed, if the host has built one yet.
    fn current(&self) -> Option<SharedHandler>;

    /// Replaces the installed handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the site cannot accept the handler.
    fn install(&self, handler: SharedHandler) -> Result<(), WrapError>;
}

/// A single mutable handler slot.
///
/// Hosts dispatch through [`HandlerSlot::get`] and hand the slot to
/// [`Instrumentation`](crate::Instrumentation) so it can be swapped in place.
#[derive(Default)]
pub struct HandlerSlot {
    handler: RwLock<Option<SharedHandler>>,
}

impl HandlerSlot {
    /// Creates a slot holding `handler`.
    pub fn new(handler: SharedHandler) -> Self {
        Self {
            handler: RwLock::new(Some(handler)),
        }
    }

    /// Creates a slot the host has not filled yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets the handler, replacing any previous one.
    pub fn set(&self, handler: SharedHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Returns the installed handler.
    pub fn get(&self) -> Option<SharedHandler> {
        self.handler.read().clone()
    }
}

impl InstallSite for HandlerSlot {
    fn current(&self) -> Option<SharedHandler> {
        self.get()
    }

    fn install(&self, handler: SharedHandler) -> Result<(), WrapError> {
        self.set(handler);
        Ok(())
    }
}

impl<S> InstallSite for Arc<S>
where
    S: InstallSite + ?Sized,
{
    fn current(&self) -> Option<SharedHandler> {
        (**self).current()
    }

    fn install(&self, handler: SharedHandler) -> Result<(), WrapError> {
        (**self).install(handler)
    }
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler = self.handler.read();
        f.debug_struct("HandlerSlot")
            .field("filled", &handler.is_some())
            .field(
                "instrumented",
                &handler.as_ref().is_some_and(|h| h.is_instrumented()),
            )
            .finish()
    }
}

/// Wrap progress for one install site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapState {
    /// No wrap has been installed.
    Unwrapped,
    /// A wrap is being installed.
    Wrapping,
    /// The site holds an instrumented handler. Terminal.
    Wrapped,
    /// Wrapping was abandoned for this process. Terminal.
    Failed,
}

impl WrapState {
    /// Whether no further wrap attempt will do work.
    pub fn is_terminal(self) -> bool {
        matches!(self, WrapState::Wrapped | WrapState::Failed)
    }
}

/// Result of one [`WrapGuard::attempt_wrap`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapOutcome {
    /// The site already holds an instrumented handler.
    AlreadyWrapped,
    /// This call installed the instrumented handler.
    Wrapped,
    /// No client was available; wrapping is abandoned.
    Skipped,
    /// The install site failed; wrapping is abandoned.
    Failed,
    /// The site has no handler yet; a later attempt may wrap it.
    HandlerUnavailable,
}

struct GuardState {
    state: WrapState,
    abandoned: Option<WrapOutcome>,
}

/// Ensures an install site is wrapped at most once.
///
/// Every attempt runs inside one critical section, so concurrent callers
/// converge on a single install and later callers observe its result.
pub struct WrapGuard {
    inner: Mutex<GuardState>,
}

impl WrapGuard {
    /// Creates a guard in the `Unwrapped` state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GuardState {
                state: WrapState::Unwrapped,
                abandoned: None,
            }),
        }
    }

    /// The current state.
    pub fn state(&self) -> WrapState {
        self.inner.lock().state
    }

    /// Wraps the site's handler unless that already happened or was abandoned.
    ///
    /// Once the guard is terminal this is a no-op: a wrapped site reports
    /// [`WrapOutcome::AlreadyWrapped`] and an abandoned one repeats the outcome
    /// that abandoned it.
    pub fn attempt_wrap<S>(&self, site: &S, client: Option<&Client>) -> WrapOutcome
    where
        S: InstallSite + ?Sized,
    {
        let mut guard = self.inner.lock();

        match guard.state {
            WrapState::Wrapped => return WrapOutcome::AlreadyWrapped,
            WrapState::Failed => return guard.abandoned.unwrap_or(WrapOutcome::Failed),
            WrapState::Unwrapped | WrapState::Wrapping => {}
        }

        let Some(current) = site.current() else {
            tracing::debug!(
                target: "apm_lifecycle",
                "No handler installed yet, deferring wrap"
            );
            return WrapOutcome::HandlerUnavailable;
        };

        if current.is_instrumented() {
            tracing::debug!(target: "apm_lifecycle", "Handler already instrumented");
            guard.state = WrapState::Wrapped;
            return WrapOutcome::AlreadyWrapped;
        }

        let Some(client) = client else {
            tracing::warn!(
                target: "apm_lifecycle",
                "No telemetry client, serving requests uninstrumented"
            );
            guard.state = WrapState::Failed;
            guard.abandoned = Some(WrapOutcome::Skipped);
            return WrapOutcome::Skipped;
        };

        guard.state = WrapState::Wrapping;
        match site.install(wrap_handler(current, Some(client))) {
            Ok(()) => {
                tracing::info!(target: "apm_lifecycle", "Request handler instrumented");
                guard.state = WrapState::Wrapped;
                WrapOutcome::Wrapped
            }
            Err(e) => {
                tracing::error!(
                    target: "apm_lifecycle",
                    error = %e,
                    "Failed to install instrumented handler"
                );
                guard.state = WrapState::Failed;
                guard.abandoned = Some(WrapOutcome::Failed);
                WrapOutcome::Failed
            }
        }
    }
}

impl Default for WrapGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WrapGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapGuard")
            .field("state", &self.state())
            .finish()
    }
}

/// Wraps `handler` so its requests are reported through `client`.
///
/// Returns the same handler when there is no client or the handler is
/// already instrumented.
pub fn wrap_handler(handler: SharedHandler, client: Option<&Client>) -> SharedHandler {
    match client {
        Some(client) if !handler.is_instrumented() => {
            Arc::new(ApmLayer::new(client.clone()).layer(handler)) as SharedHandler
        }
        _ => handler,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_client::RecordingCollector;
    use apm_configuration::Configuration;
    use apm_tower::{Request, ResponseBody, handler_fn};
    use http::{HeaderMap, Method, StatusCode};
    use std::sync::Barrier;
    use std::thread;

    fn recording_client() -> (Client, Arc<RecordingCollector>) {
        let config = Configuration::builder()
            .service_name("erpnext")
            .server_url("http://apm-server:8200")
            .build()
            .unwrap();
        let recorder = Arc::new(RecordingCollector::new());
        (Client::from_shared(recorder.clone(), config), recorder)
    }

    fn app() -> SharedHandler {
        Arc::new(handler_fn(|_, start| {
            start.start_response(StatusCode::OK, &HeaderMap::new());
            Ok(ResponseBody::from_chunks(["ok"]))
        }))
    }

    fn serve(handler: &SharedHandler) {
        let mut start = |_: StatusCode, _: &HeaderMap| {};
        let request = Request::new(Method::GET, "/").header("host", "erp.local").unwrap();
        handler.call(request, &mut start).unwrap();
    }

    /// Site whose install always fails.
    struct ReadOnlySite {
        handler: SharedHandler,
    }

    impl InstallSite for ReadOnlySite {
        fn current(&self) -> Option<SharedHandler> {
            Some(self.handler.clone())
        }

        fn install(&self, _: SharedHandler) -> Result<(), WrapError> {
            Err(WrapError::Rejected("attribute is read-only".to_string()))
        }
    }

    #[test]
    fn test_repeated_attempts_wrap_once() {
        let (client, recorder) = recording_client();
        let slot = HandlerSlot::new(app());
        let guard = WrapGuard::new();

        let outcomes: Vec<_> = (0..5)
            .map(|_| guard.attempt_wrap(&slot, Some(&client)))
            .collect();

        assert_eq!(outcomes[0], WrapOutcome::Wrapped);
        assert!(outcomes[1..].iter().all(|o| *o == WrapOutcome::AlreadyWrapped));
        assert_eq!(guard.state(), WrapState::Wrapped);

        serve(&slot.get().unwrap());
        assert_eq!(recorder.transactions().len(), 1);
    }

    #[test]
    fn test_pre_instrumented_handler_is_left_alone() {
        let (client, _) = recording_client();
        let instrumented = wrap_handler(app(), Some(&client));
        let slot = HandlerSlot::new(instrumented.clone());
        let guard = WrapGuard::new();

        assert_eq!(
            guard.attempt_wrap(&slot, Some(&client)),
            WrapOutcome::AlreadyWrapped
        );
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &instrumented));
        assert_eq!(guard.state(), WrapState::Wrapped);
    }

    #[test]
    fn test_missing_client_abandons_for_good() {
        let (client, _) = recording_client();
        let original = app();
        let slot = HandlerSlot::new(original.clone());
        let guard = WrapGuard::new();

        assert_eq!(guard.attempt_wrap(&slot, None), WrapOutcome::Skipped);
        assert_eq!(guard.state(), WrapState::Failed);
        assert_eq!(
            guard.attempt_wrap(&slot, Some(&client)),
            WrapOutcome::Skipped
        );
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &original));
    }

    #[test]
    fn test_install_failure_is_contained() {
        let (client, _) = recording_client();
        let site = ReadOnlySite { handler: app() };
        let guard = WrapGuard::new();

        assert_eq!(guard.attempt_wrap(&site, Some(&client)), WrapOutcome::Failed);
        assert_eq!(guard.state(), WrapState::Failed);
        assert_eq!(guard.attempt_wrap(&site, Some(&client)), WrapOutcome::Failed);
    }

    #[test]
    fn test_empty_slot_can_be_wrapped_later() {
        let (client, _) = recording_client();
        let slot = HandlerSlot::empty();
        let guard = WrapGuard::new();

        assert_eq!(
            guard.attempt_wrap(&slot, Some(&client)),
            WrapOutcome::HandlerUnavailable
        );
        assert_eq!(guard.state(), WrapState::Unwrapped);

        slot.set(app());
        assert_eq!(guard.attempt_wrap(&slot, Some(&client)), WrapOutcome::Wrapped);
        assert!(slot.get().unwrap().is_instrumented());
    }

    #[test]
    fn test_concurrent_attempts_install_once() {
        const THREADS: usize = 8;

        let (client, recorder) = recording_client();
        let slot = Arc::new(HandlerSlot::new(app()));
        let guard = Arc::new(WrapGuard::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (client, slot, guard, barrier) =
                    (client.clone(), slot.clone(), guard.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    guard.attempt_wrap(&slot, Some(&client))
                })
            })
            .collect();

        let outcomes: Vec<WrapOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let wrapped = outcomes
            .iter()
            .filter(|o| **o == WrapOutcome::Wrapped)
            .count();
        assert_eq!(wrapped, 1);

        serve(&slot.get().unwrap());
        assert_eq!(recorder.transactions().len(), 1);
    }

    #[test]
    fn test_wrap_handler_identity() {
        let (client, _) = recording_client();
        let original = app();

        let unwrapped = wrap_handler(original.clone(), None);
        assert!(Arc::ptr_eq(&unwrapped, &original));

        let wrapped = wrap_handler(original.clone(), Some(&client));
        assert!(wrapped.is_instrumented());
        assert!(Arc::ptr_eq(&wrap_handler(wrapped.clone(), Some(&client)), &wrapped));
    }
}
