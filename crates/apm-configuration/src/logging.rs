//! Diagnostic logging setup.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Installs a global `tracing` subscriber for instrumentation diagnostics.
///
/// The filter is read from `RUST_LOG`, defaulting to `info`. Lifecycle events
/// are logged under the `apm_lifecycle` target and per-request failures under
/// `apm_request`, so `RUST_LOG=apm_lifecycle=debug` narrows output to the
/// initialisation path.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_tracing() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time())
        .with(filter)
        .try_init()
}
