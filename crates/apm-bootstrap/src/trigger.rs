//! Entry points that set up instrumentation.
//!
//! A host may reach instrumentation from several places: when its extension
//! module loads, from an explicit startup call, and from a fallback hook run
//! after a later lifecycle event. Each is a [`Trigger`]; all of them go
//! through the same lifecycle and guard, so only one ever installs the
//! instrumented handler.

use crate::guard::{HandlerSlot, InstallSite, WrapGuard, WrapOutcome};
use crate::lifecycle::{ClientLifecycle, InitStatus};
use std::fmt;

/// The code path that attempted setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Module load time.
    OnLoad,
    /// Explicit startup call.
    Startup,
    /// Fallback after a later lifecycle event.
    Deferred,
}

impl Trigger {
    /// Whether this trigger re-resolves configuration and rebuilds the client.
    ///
    /// The deferred trigger runs after the host has finished booting, when
    /// environment variables missing at load time may now be present.
    pub fn forces_init(self) -> bool {
        matches!(self, Trigger::Deferred)
    }

    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::OnLoad => "on_load",
            Trigger::Startup => "startup",
            Trigger::Deferred => "deferred",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReport {
    /// The trigger that ran.
    pub trigger: Trigger,
    /// Whether a client was available to the wrap attempt.
    pub client_available: bool,
    /// The guard's answer.
    pub outcome: WrapOutcome,
}

/// Lifecycle, guard and install site bundled for the triggers.
///
/// # Example
///
/// ```
/// use apm_bootstrap::{ClientLifecycle, HandlerSlot, Instrumentation, WrapOutcome};
/// use apm_client::{Client, InitError, RecordingCollector};
/// use apm_configuration::figment::{Figment, providers::Serialized};
/// use apm_configuration::{ConfigResolver, Configuration};
/// use apm_tower::{Handler, ResponseBody, handler_fn};
/// use std::sync::Arc;
///
/// let resolver = ConfigResolver::new().without_env().with_overrides(
///     Figment::new()
///         .merge(Serialized::default("service_name", "erpnext"))
///         .merge(Serialized::default("server_url", "http://apm-server:8200")),
/// );
/// let factory = |config: &Configuration| -> Result<Client, InitError> {
///     Ok(Client::new(RecordingCollector::new(), config.clone()))
/// };
///
/// let slot = HandlerSlot::new(Arc::new(handler_fn(|_, _| Ok(ResponseBody::empty()))));
/// let instrumentation = Instrumentation::new(ClientLifecycle::new(resolver, factory), slot);
///
/// assert_eq!(instrumentation.on_load().outcome, WrapOutcome::Wrapped);
/// assert_eq!(instrumentation.startup().outcome, WrapOutcome::AlreadyWrapped);
/// assert!(instrumentation.site().get().unwrap().is_instrumented());
/// ```
#[derive(Debug)]
pub struct Instrumentation<S = HandlerSlot> {
    lifecycle: ClientLifecycle,
    guard: WrapGuard,
    site: S,
}

impl<S> Instrumentation<S>
where
    S: InstallSite,
{
    /// Bundles a lifecycle with the site holding the host's handler.
    pub fn new(lifecycle: ClientLifecycle, site: S) -> Self {
        Self {
            lifecycle,
            guard: WrapGuard::new(),
            site,
        }
    }

    /// Runs the module-load trigger.
    pub fn on_load(&self) -> TriggerReport {
        self.run(Trigger::OnLoad)
    }

    /// Runs the explicit startup trigger.
    pub fn startup(&self) -> TriggerReport {
        self.run(Trigger::Startup)
    }

    /// Runs the deferred fallback trigger.
    pub fn deferred(&self) -> TriggerReport {
        self.run(Trigger::Deferred)
    }

    /// Initializes the client and attempts the guarded wrap.
    ///
    /// A forcing trigger only re-initializes while the guard can still act;
    /// once the site is wrapped or abandoned the installed client is kept.
    ///
    /// When initialization fails in a way a later attempt can fix (incomplete
    /// configuration, a collector that could not be built), the trigger
    /// reports [`WrapOutcome::Skipped`] and leaves the guard untouched, so the
    /// deferred trigger can still wrap. Only a settled absence of a client
    /// (instrumentation disabled) reaches the guard and abandons wrapping.
    pub fn run(&self, trigger: Trigger) -> TriggerReport {
        let force = trigger.forces_init() && !self.guard.state().is_terminal();
        let status = self.lifecycle.init_status(force);

        let (client, outcome) = match status {
            InitStatus::Unavailable => {
                tracing::debug!(
                    target: "apm_lifecycle",
                    trigger = %trigger,
                    "No telemetry client yet, leaving handler for a later trigger"
                );
                (None, WrapOutcome::Skipped)
            }
            status => {
                let client = status.client();
                let outcome = self.guard.attempt_wrap(&self.site, client.as_ref());
                (client, outcome)
            }
        };

        tracing::debug!(
            target: "apm_lifecycle",
            trigger = %trigger,
            client_available = client.is_some(),
            outcome = ?outcome,
            "Instrumentation trigger ran"
        );

        TriggerReport {
            trigger,
            client_available: client.is_some(),
            outcome,
        }
    }

    /// The client lifecycle.
    pub fn lifecycle(&self) -> &ClientLifecycle {
        &self.lifecycle
    }

    /// The wrap guard.
    pub fn guard(&self) -> &WrapGuard {
        &self.guard
    }

    /// The install site.
    pub fn site(&self) -> &S {
        &self.site
    }
}
