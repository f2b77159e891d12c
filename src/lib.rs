//! Request APM - exactly-once transaction instrumentation for synchronous HTTP
//! handlers.
//!
//! This package re-exports the workspace crates and carries the
//! workspace-level end-to-end tests:
//!
//! - [`configuration`]: `ELASTIC_APM_*` resolution and tracing setup
//! - [`client`]: the collector capability, the OTLP-backed client and an
//!   in-memory recorder
//! - [`middleware`]: the Tower layer that turns each request into a transaction
//! - [`bootstrap`]: client lifecycle, wrap-once guard and setup triggers
//!
//! # Wiring a Host
//!
//! ```no_run
//! use request_apm::{ClientLifecycle, HandlerSlot, Instrumentation};
//! use request_apm::middleware::{ResponseBody, handler_fn};
//! use std::sync::Arc;
//!
//! request_apm::configuration::init_tracing().ok();
//!
//! let slot = HandlerSlot::new(Arc::new(handler_fn(|_, _| Ok(ResponseBody::empty()))));
//! let instrumentation = Instrumentation::new(ClientLifecycle::from_env(), slot);
//!
//! // Any of these may run, in any order, any number of times.
//! instrumentation.on_load();
//! instrumentation.startup();
//! instrumentation.deferred();
//! ```

#![forbid(unsafe_code)]

pub use apm_bootstrap as bootstrap;
pub use apm_client as client;
pub use apm_configuration as configuration;
pub use apm_tower as middleware;

pub use apm_bootstrap::{
    ClientLifecycle, HandlerSlot, Instrumentation, Trigger, TriggerReport, WrapGuard, WrapOutcome,
};
pub use apm_tower::{ApmLayer, Handler};
