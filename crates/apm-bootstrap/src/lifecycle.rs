//! Process-wide client ownership with idempotent initialization.

use apm_client::{Client, ClientFactory, ExceptionInfo, OtlpClientFactory};
use apm_configuration::ConfigResolver;
use parking_lot::Mutex;
use std::fmt;

/// What an initialization attempt produced.
#[derive(Debug, Clone)]
pub(crate) enum InitStatus {
    /// A client is available.
    Ready(Client),
    /// Instrumentation is disabled; no client will ever be built.
    Disabled,
    /// Configuration or construction failed; a later attempt may succeed.
    Unavailable,
}

impl InitStatus {
    pub(crate) fn client(self) -> Option<Client> {
        match self {
            InitStatus::Ready(client) => Some(client),
            InitStatus::Disabled | InitStatus::Unavailable => None,
        }
    }
}

#[derive(Default)]
struct LifecycleState {
    client: Option<Client>,
    initialized: bool,
}

/// Owns the process's [`Client`].
///
/// Initialization never fails outward: configuration and construction errors
/// are logged and surface as `None`. Concurrent callers serialize on one
/// critical section, so they converge on a single client.
pub struct ClientLifecycle {
    resolver: ConfigResolver,
    factory: Box<dyn ClientFactory>,
    state: Mutex<LifecycleState>,
}

impl ClientLifecycle {
    /// Creates a lifecycle that resolves with `resolver` and builds clients with
    /// `factory`.
    pub fn new<F>(resolver: ConfigResolver, factory: F) -> Self
    where
        F: ClientFactory + 'static,
    {
        Self {
            resolver,
            factory: Box::new(factory),
            state: Mutex::new(LifecycleState::default()),
        }
    }

    /// Creates a lifecycle reading `ELASTIC_APM_*` and exporting over OTLP.
    pub fn from_env() -> Self {
        Self::new(ConfigResolver::new(), OtlpClientFactory::default())
    }

    /// Initializes the client, returning it when one is available.
    ///
    /// Without `force`, an already initialized lifecycle returns its current
    /// client untouched. With `force`, configuration is resolved again and a
    /// new client replaces the old one; the previous client is kept if the
    /// new one cannot be built.
    ///
    /// When instrumentation is disabled the lifecycle is marked initialized,
    /// any stored client is discarded, and `None` is returned. A failed
    /// resolution or construction leaves the lifecycle uninitialized so a
    /// later call can retry.
    pub fn init(&self, force: bool) -> Option<Client> {
        self.init_status(force).client()
    }

    /// Like [`init`](Self::init), but also says whether a missing client is
    /// final for this process or may appear on a later attempt.
    pub(crate) fn init_status(&self, force: bool) -> InitStatus {
        let mut state = self.state.lock();

        if state.initialized && !force {
            return match &state.client {
                Some(client) => InitStatus::Ready(client.clone()),
                None => InitStatus::Disabled,
            };
        }

        if !self.resolver.is_enabled() {
            tracing::info!(
                target: "apm_lifecycle",
                "Instrumentation disabled (ELASTIC_APM_ENABLED is not truthy)"
            );
            state.client = None;
            state.initialized = true;
            return InitStatus::Disabled;
        }

        let config = match self.resolver.resolve() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    target: "apm_lifecycle",
                    error = %e,
                    "Invalid instrumentation configuration"
                );
                return InitStatus::Unavailable;
            }
        };

        match self.factory.create(&config) {
            Ok(client) => {
                tracing::info!(
                    target: "apm_lifecycle",
                    service = config.service_name(),
                    server = config.server_url(),
                    forced = force,
                    "Telemetry client initialized"
                );
                state.client = Some(client.clone());
                state.initialized = true;
                InitStatus::Ready(client)
            }
            Err(e) => {
                tracing::error!(
                    target: "apm_lifecycle",
                    error = %e,
                    "Failed to create telemetry client"
                );
                InitStatus::Unavailable
            }
        }
    }

    /// Returns the current client without side effects.
    pub fn get(&self) -> Option<Client> {
        self.state.lock().client.clone()
    }

    /// Whether a previous [`init`](Self::init) completed.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Flushes telemetry buffered by the current client, if any.
    pub fn flush(&self) {
        if let Some(client) = self.get() {
            client.collector().flush();
        }
    }

    /// Reports an error outside any transaction.
    ///
    /// Does nothing without a client. Reporting failures are logged and
    /// dropped.
    pub fn capture_exception<E>(&self, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        let Some(client) = self.get() else {
            return;
        };

        let exception = ExceptionInfo::from_error(err);
        if let Err(e) = client.collector().capture_exception(None, &exception) {
            tracing::debug!(
                target: "apm_lifecycle",
                error = %e,
                "Failed to capture exception"
            );
        }
    }
}

impl fmt::Debug for ClientLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClientLifecycle")
            .field("resolver", &self.resolver)
            .field("client", &state.client)
            .field("initialized", &state.initialized)
            .finish_non_exhaustive()
    }
}
