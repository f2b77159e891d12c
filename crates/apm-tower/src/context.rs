//! Request snapshot attached to each transaction.

use crate::handler::Request;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Replacement value for redacted headers and environment entries.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
];

/// Errors building a [`RequestContext`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContextError {
    /// A header value contains bytes outside visible ASCII.
    #[error("header `{0}` is not valid visible ASCII")]
    InvalidHeader(String),

    /// Neither a `Host` header nor `SERVER_NAME` is present.
    #[error("request has no Host header and no SERVER_NAME")]
    MissingHost,

    /// The snapshot could not be encoded.
    #[error("failed to encode request context")]
    Encode(#[from] serde_json::Error),
}

/// Serializable view of an incoming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    /// Request method.
    pub method: String,
    /// Reconstructed absolute URL.
    pub url: String,
    /// Headers keyed by lowercase name; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
    /// Server environment variables.
    pub env: BTreeMap<String, String>,
}

impl RequestContext {
    /// Captures the request, redacting credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if a header is not visible ASCII or no host can be
    /// determined.
    pub fn capture(request: &Request) -> Result<Self, ContextError> {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &request.headers {
            let value = if is_sensitive_header(name.as_str()) {
                REDACTED
            } else {
                value
                    .to_str()
                    .map_err(|_| ContextError::InvalidHeader(name.to_string()))?
            };

            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let env = request
            .environ
            .iter()
            .map(|(key, value)| {
                let value = if is_sensitive_env(key) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();

        Ok(Self {
            method: request.method.to_string(),
            url: resolve_url(request)?,
            headers,
            env,
        })
    }

    /// Encodes the snapshot for the collector.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_value(&self) -> Result<serde_json::Value, ContextError> {
        Ok(serde_json::to_value(self)?)
    }
}

fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// `HTTP_*` environment entries mirror headers and get the same treatment.
fn is_sensitive_env(key: &str) -> bool {
    key.strip_prefix("HTTP_")
        .map(|header| is_sensitive_header(&header.replace('_', "-")))
        .unwrap_or(false)
}

fn resolve_url(request: &Request) -> Result<String, ContextError> {
    let scheme = request
        .scheme
        .as_deref()
        .or_else(|| request.environ.get("wsgi.url_scheme").map(String::as_str))
        .unwrap_or("http");

    let host = match request.headers.get(http::header::HOST) {
        Some(host) => host
            .to_str()
            .map_err(|_| ContextError::InvalidHeader("host".to_string()))?
            .to_string(),
        None => server_host(request, scheme)?,
    };

    let mut url = format!("{scheme}://{host}{}", request.path);
    if let Some(query) = request.query.as_deref()
        && !query.is_empty()
    {
        url.push('?');
        url.push_str(query);
    }
    Ok(url)
}

fn server_host(request: &Request, scheme: &str) -> Result<String, ContextError> {
    let name = request
        .environ
        .get("SERVER_NAME")
        .filter(|name| !name.is_empty())
        .ok_or(ContextError::MissingHost)?;

    let default_port = match scheme {
        "https" => "443",
        _ => "80",
    };

    match request.environ.get("SERVER_PORT") {
        Some(port) if !port.is_empty() && port != default_port => Ok(format!("{name}:{port}")),
        _ => Ok(name.clone()),
    }
}
