//! Client lifecycle, wrap-once guard and setup triggers.
//!
//! This crate decides *whether* and *when* the host's request handler gets
//! instrumented:
//!
//! - [`ClientLifecycle`] owns the process's telemetry [`Client`](apm_client::Client)
//!   and initializes it idempotently, with an explicit forced re-init.
//! - [`WrapGuard`] installs the instrumented handler into an [`InstallSite`]
//!   at most once, however many callers race to do it.
//! - [`Instrumentation`] bundles both with the host's [`HandlerSlot`] and
//!   exposes the three setup [`Trigger`]s.
//!
//! Nothing here returns an error to the host. Every failure degrades to an
//! uninstrumented handler plus a log line under the `apm_lifecycle` target.
//!
//! # Example
//!
//! ```no_run
//! use apm_bootstrap::{ClientLifecycle, HandlerSlot, Instrumentation};
//! use apm_tower::{ResponseBody, handler_fn};
//! use std::sync::Arc;
//!
//! let slot = HandlerSlot::new(Arc::new(handler_fn(|_, _| Ok(ResponseBody::empty()))));
//! let instrumentation = Instrumentation::new(ClientLifecycle::from_env(), slot);
//!
//! let report = instrumentation.startup();
//! println!("{:?}", report.outcome);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod guard;
mod lifecycle;
mod trigger;

pub use error::WrapError;
pub use guard::{HandlerSlot, InstallSite, WrapGuard, WrapOutcome, WrapState, wrap_handler};
pub use lifecycle::ClientLifecycle;
pub use trigger::{Instrumentation, Trigger, TriggerReport};
