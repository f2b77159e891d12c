//! Collector client capability for request transaction instrumentation.
//!
//! The instrumentation layer never talks to a telemetry backend directly. It
//! drives a [`Collector`] through a shared [`Client`] handle:
//!
//! - begin a transaction, name it, tag its result, attach context
//! - capture exceptions against it
//! - end it exactly once
//!
//! Two collectors ship with the crate:
//!
//! - [`OtelCollector`] maps transactions onto OpenTelemetry server spans. The
//!   default [`OtlpClientFactory`] builds one exporting OTLP/HTTP to the
//!   configured server URL.
//! - [`RecordingCollector`] keeps every call in memory, for tests and for hosts
//!   that want to assert on what was reported.
//!
//! # Example
//!
//! ```no_run
//! use apm_client::{ClientFactory, OtlpClientFactory};
//! use apm_configuration::Configuration;
//!
//! let config = Configuration::builder()
//!     .service_name("erpnext")
//!     .server_url("http://apm-server:8200")
//!     .build()?;
//!
//! let client = OtlpClientFactory::new().create(&config)?;
//! let id = client.collector().begin_transaction("request");
//! client.collector().end_transaction(id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod collector;
mod error;
mod otel;
mod recording;

pub use client::{Client, ClientFactory};
pub use collector::{Collector, ExceptionInfo, TransactionId, TransactionResult};
pub use error::{CaptureError, InitError};
pub use otel::{INSTRUMENTATION_SCOPE, OtelCollector, OtlpClientFactory};
pub use recording::{CollectorEvent, RecordedTransaction, RecordingCollector};
