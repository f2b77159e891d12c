//! The synchronous request/response calling convention.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tower::BoxError;

/// An incoming request as seen by a [`Handler`].
///
/// `environ` carries host-provided server variables (`SERVER_NAME`,
/// `SERVER_PORT`, `REMOTE_ADDR`, ...) that have no place in the HTTP message.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Path component, without the query string.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// URL scheme, `http` when absent.
    pub scheme: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Server environment variables.
    pub environ: BTreeMap<String, String>,
}

impl Request {
    /// Creates a request with no headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the query string.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Sets the URL scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Appends a header.
    ///
    /// Names are case-insensitive and stored lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid header token.
    pub fn header<K, V>(mut self, name: K, value: V) -> Result<Self, http::Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(name).map_err(Into::into)?;
        let value = HeaderValue::try_from(value).map_err(Into::into)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Sets a server environment variable.
    #[must_use]
    pub fn environ(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environ.insert(key.into(), value.into());
        self
    }
}

/// Callback through which a handler announces the response status and headers.
///
/// Any `FnMut(StatusCode, &HeaderMap)` closure is a `StartResponse`.
pub trait StartResponse {
    /// Starts the response.
    fn start_response(&mut self, status: StatusCode, headers: &HeaderMap);
}

impl<F> StartResponse for F
where
    F: FnMut(StatusCode, &HeaderMap),
{
    fn start_response(&mut self, status: StatusCode, headers: &HeaderMap) {
        self(status, headers)
    }
}

/// Lazily produced body chunks.
pub type BodyStream = Box<dyn Iterator<Item = Result<Bytes, BoxError>> + Send>;

/// The body returned by a handler.
pub enum ResponseBody {
    /// All chunks produced before the handler returned.
    Materialized(Vec<Bytes>),
    /// Chunks produced as the consumer iterates; production may fail midway.
    Streamed(BodyStream),
}

impl ResponseBody {
    /// A body with no chunks.
    pub fn empty() -> Self {
        ResponseBody::Materialized(Vec::new())
    }

    /// A materialized body from the given chunks.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        ResponseBody::Materialized(chunks.into_iter().map(Into::into).collect())
    }

    /// A streamed body over the given iterator.
    pub fn streamed<I>(chunks: I) -> Self
    where
        I: Iterator<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        ResponseBody::Streamed(Box::new(chunks))
    }

    /// Whether chunks are produced lazily.
    pub fn is_streamed(&self) -> bool {
        matches!(self, ResponseBody::Streamed(_))
    }

    /// Drains the body into its chunks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while producing a streamed body.
    pub fn collect(self) -> Result<Vec<Bytes>, BoxError> {
        match self {
            ResponseBody::Materialized(chunks) => Ok(chunks),
            ResponseBody::Streamed(stream) => stream.collect(),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Materialized(chunks) => {
                f.debug_tuple("Materialized").field(&chunks.len()).finish()
            }
            ResponseBody::Streamed(_) => f.debug_tuple("Streamed").finish_non_exhaustive(),
        }
    }
}

/// A synchronous request handler.
///
/// Handlers may be invoked concurrently from many threads.
pub trait Handler: Send + Sync + 'static {
    /// Serves one request.
    ///
    /// # Errors
    ///
    /// Returns whatever error the application raised before a body existed.
    fn call(
        &self,
        request: Request,
        start_response: &mut dyn StartResponse,
    ) -> Result<ResponseBody, BoxError>;

    /// Whether this handler already reports transactions.
    ///
    /// Only the instrumentation wrapper answers `true`; it is how an install
    /// site can tell a wrapped handler from a bare one.
    fn is_instrumented(&self) -> bool {
        false
    }
}

/// A handler shared between an install site and its callers.
pub type SharedHandler = Arc<dyn Handler>;

impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    fn call(
        &self,
        request: Request,
        start_response: &mut dyn StartResponse,
    ) -> Result<ResponseBody, BoxError> {
        (**self).call(request, start_response)
    }

    fn is_instrumented(&self) -> bool {
        (**self).is_instrumented()
    }
}

/// Returns a [`Handler`] that calls the given closure.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, &mut dyn StartResponse) -> Result<ResponseBody, BoxError>
        + Send
        + Sync
        + 'static,
{
    HandlerFn { f }
}

/// A [`Handler`] implemented by a closure; see [`handler_fn`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(Request, &mut dyn StartResponse) -> Result<ResponseBody, BoxError>
        + Send
        + Sync
        + 'static,
{
    fn call(
        &self,
        request: Request,
        start_response: &mut dyn StartResponse,
    ) -> Result<ResponseBody, BoxError> {
        (self.f)(request, start_response)
    }
}
