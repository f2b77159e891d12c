//! Request transaction middleware for synchronous HTTP handlers.
//!
//! This crate provides a Tower layer that wraps a [`Handler`] so that every
//! request it serves is reported to a collector as a transaction. The wrapped
//! handler keeps the same calling convention: request in, response-start
//! callback, body out. Status, headers and body bytes pass through untouched.
//!
//! # Usage
//!
//! ```
//! use apm_client::{Client, RecordingCollector};
//! use apm_configuration::Configuration;
//! use apm_tower::{ApmLayer, Handler, Request, ResponseBody, StartResponse, handler_fn};
//! use http::{HeaderMap, Method, StatusCode};
//! use tower::ServiceBuilder;
//!
//! let config = Configuration::builder()
//!     .service_name("erpnext")
//!     .server_url("http://apm-server:8200")
//!     .build()
//!     .unwrap();
//! let client = Client::new(RecordingCollector::new(), config);
//!
//! let app = handler_fn(|_request: Request, start: &mut dyn StartResponse| {
//!     start.start_response(StatusCode::OK, &HeaderMap::new());
//!     Ok(ResponseBody::from_chunks(["hello"]))
//! });
//!
//! let instrumented = ServiceBuilder::new()
//!     .layer(ApmLayer::new(client))
//!     .service(app);
//!
//! let mut status = None;
//! let mut start = |s: StatusCode, _: &HeaderMap| status = Some(s);
//! let body = instrumented
//!     .call(Request::new(Method::GET, "/orders").header("host", "erp.local").unwrap(), &mut start)
//!     .unwrap();
//!
//! assert_eq!(body.collect().unwrap(), vec![bytes::Bytes::from("hello")]);
//! assert_eq!(status, Some(StatusCode::OK));
//! ```
//!
//! # Transaction Boundaries
//!
//! Each invocation begins one transaction named `"{method} {path}"` and ends
//! it exactly once:
//!
//! - **Materialized body**: ended as soon as the handler returns, before the
//!   chunks are handed back.
//! - **Streamed body**: ended when the returned [`InstrumentedBody`] first
//!   terminates (exhaustion or error), or when it is dropped early.
//! - **Handler error**: the error is captured, the result forced to `error`,
//!   the transaction ended and the error returned unchanged.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod context;
mod handler;
mod layer;
mod service;
mod transaction;

pub use body::InstrumentedBody;
pub use context::{ContextError, REDACTED, RequestContext};
pub use handler::{
    BodyStream, Handler, HandlerFn, Request, ResponseBody, SharedHandler, StartResponse,
    handler_fn,
};
pub use layer::ApmLayer;
pub use service::ApmService;
pub use transaction::{ActiveTransaction, TRANSACTION_TYPE};

pub use tower::BoxError;
