//! OpenTelemetry-backed collector.
//!
//! Each transaction becomes a server span. The span starts on
//! `begin_transaction`, is renamed once a name is known, and ends on
//! `end_transaction` with a status derived from the transaction result.

use crate::client::{Client, ClientFactory};
use crate::collector::{Collector, ExceptionInfo, TransactionId, TransactionResult};
use crate::error::{CaptureError, InitError};
use apm_configuration::Configuration;
use opentelemetry::KeyValue;
use opentelemetry::trace::{Span, SpanKind, Status, Tracer, TracerProvider as _};
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_semantic_conventions::attribute::{EXCEPTION_MESSAGE, EXCEPTION_TYPE};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::Duration;

/// Instrumentation scope name used for all transaction spans.
pub const INSTRUMENTATION_SCOPE: &str = "request-apm";

const TRANSACTION_TYPE_KEY: &str = "transaction.type";
const TRANSACTION_RESULT_KEY: &str = "transaction.result";
const EXCEPTION_CAUSES_KEY: &str = "exception.causes";

struct OpenTransaction<S> {
    span: S,
    named: bool,
    result: Option<TransactionResult>,
}

/// Collector that reports transactions as OpenTelemetry spans.
///
/// Works with any [`Tracer`]; [`OtlpClientFactory`] wires it to an SDK
/// provider exporting over OTLP/HTTP.
pub struct OtelCollector<T: Tracer> {
    tracer: T,
    provider: Option<SdkTracerProvider>,
    transactions: Mutex<HashMap<TransactionId, OpenTransaction<T::Span>>>,
}

impl<T: Tracer> OtelCollector<T> {
    /// Creates a collector reporting through `tracer`.
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            provider: None,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of transactions begun but not yet ended.
    pub fn open_transactions(&self) -> usize {
        self.transactions.lock().len()
    }
}

impl OtelCollector<SdkTracer> {
    /// Creates a collector that also owns the provider, so it can flush it.
    pub fn with_provider(tracer: SdkTracer, provider: SdkTracerProvider) -> Self {
        Self {
            tracer,
            provider: Some(provider),
            transactions: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Collector for OtelCollector<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + 'static,
{
    fn begin_transaction(&self, transaction_type: &str) -> TransactionId {
        let id = TransactionId::new();
        let span = self
            .tracer
            .span_builder(transaction_type.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes(vec![KeyValue::new(
                TRANSACTION_TYPE_KEY,
                transaction_type.to_string(),
            )])
            .start(&self.tracer);

        self.transactions.lock().insert(
            id,
            OpenTransaction {
                span,
                named: false,
                result: None,
            },
        );
        id
    }

    fn set_transaction_name(&self, id: TransactionId, name: &str, override_existing: bool) {
        if let Some(open) = self.transactions.lock().get_mut(&id)
            && (override_existing || !open.named)
        {
            open.span.update_name(name.to_string());
            open.named = true;
        }
    }

    fn set_transaction_result(
        &self,
        id: TransactionId,
        result: TransactionResult,
        override_existing: bool,
    ) {
        if let Some(open) = self.transactions.lock().get_mut(&id)
            && (override_existing || open.result.is_none())
        {
            open.result = Some(result);
        }
    }

    fn set_context(&self, id: TransactionId, key: &str, value: Json) -> Result<(), CaptureError> {
        let mut attributes = Vec::new();
        flatten_context(key.to_string(), &value, &mut attributes);

        let mut transactions = self.transactions.lock();
        let open = transactions
            .get_mut(&id)
            .ok_or(CaptureError::UnknownTransaction(id))?;
        open.span.set_attributes(attributes);
        Ok(())
    }

    fn capture_exception(
        &self,
        id: Option<TransactionId>,
        exception: &ExceptionInfo,
    ) -> Result<(), CaptureError> {
        let attributes = exception_attributes(exception);

        match id {
            Some(id) => {
                let mut transactions = self.transactions.lock();
                let open = transactions
                    .get_mut(&id)
                    .ok_or(CaptureError::UnknownTransaction(id))?;
                open.span.add_event("exception", attributes);
            }
            None => {
                let mut span = self.tracer.start("exception");
                span.add_event("exception", attributes);
                span.set_status(Status::error(exception.message.clone()));
                span.end();
            }
        }

        Ok(())
    }

    fn end_transaction(&self, id: TransactionId) {
        let Some(mut open) = self.transactions.lock().remove(&id) else {
            tracing::debug!(target: "apm_request", transaction = %id, "End for unknown transaction ignored");
            return;
        };

        if let Some(result) = open.result {
            open.span
                .set_attribute(KeyValue::new(TRANSACTION_RESULT_KEY, result.as_str()));
            open.span.set_status(span_status(result));
        }

        open.span.end();
    }

    fn flush(&self) {
        if let Some(provider) = &self.provider
            && let Err(e) = provider.force_flush()
        {
            tracing::warn!(target: "apm_lifecycle", error = %e, "Failed to flush tracer provider");
        }
    }
}

fn span_status(result: TransactionResult) -> Status {
    match result {
        TransactionResult::Success => Status::Ok,
        TransactionResult::ClientError => Status::Unset,
        TransactionResult::ServerError | TransactionResult::Error => {
            Status::error(result.as_str())
        }
    }
}

fn exception_attributes(exception: &ExceptionInfo) -> Vec<KeyValue> {
    let mut attributes = vec![KeyValue::new(EXCEPTION_MESSAGE, exception.message.clone())];

    if let Some(kind) = &exception.kind {
        attributes.push(KeyValue::new(EXCEPTION_TYPE, kind.clone()));
    }

    if !exception.causes.is_empty() {
        attributes.push(KeyValue::new(
            EXCEPTION_CAUSES_KEY,
            exception.causes.join("\n"),
        ));
    }

    attributes
}

/// Flattens a context object into dotted span attributes.
fn flatten_context(prefix: String, value: &Json, out: &mut Vec<KeyValue>) {
    match value {
        Json::Object(map) => {
            for (key, nested) in map {
                flatten_context(format!("{prefix}.{key}"), nested, out);
            }
        }
        Json::String(s) => out.push(KeyValue::new(prefix, s.clone())),
        Json::Bool(b) => out.push(KeyValue::new(prefix, *b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(KeyValue::new(prefix, i));
            } else if let Some(f) = n.as_f64() {
                out.push(KeyValue::new(prefix, f));
            }
        }
        Json::Array(_) => out.push(KeyValue::new(prefix, value.to_string())),
        Json::Null => {}
    }
}

/// Builds clients that export transactions over OTLP/HTTP.
///
/// Spans are sent to `{server_url}/v1/traces` through a batch processor. When
/// a secret token is configured it is sent as a bearer `Authorization` header.
/// Service name, version, environment, node name and framework tags are
/// attached as resource attributes.
#[derive(Debug, Clone)]
pub struct OtlpClientFactory {
    timeout: Duration,
}

impl OtlpClientFactory {
    /// Creates a factory with a 10 second export timeout.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the export timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OtlpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for OtlpClientFactory {
    fn create(&self, config: &Configuration) -> Result<Client, InitError> {
        let provider = build_tracer_provider(config, self.timeout)?;
        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);

        Ok(Client::new(
            OtelCollector::with_provider(tracer, provider),
            config.clone(),
        ))
    }
}

fn traces_endpoint(server_url: &str) -> String {
    format!("{}/v1/traces", server_url.trim_end_matches('/'))
}

fn build_resource(config: &Configuration) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.framework.name", config.framework_name()),
        KeyValue::new("service.framework.version", config.framework_version()),
    ];

    if let Some(version) = config.service_version() {
        attributes.push(KeyValue::new("service.version", version.to_string()));
    }

    if let Some(env) = config.environment() {
        attributes.push(KeyValue::new("deployment.environment.name", env.to_string()));
    }

    if let Some(node) = config.service_node_name() {
        attributes.push(KeyValue::new("service.instance.id", node.to_string()));
    }

    Resource::builder()
        .with_service_name(config.service_name().to_string())
        .with_attributes(attributes)
        .build()
}

fn build_tracer_provider(
    config: &Configuration,
    timeout: Duration,
) -> Result<SdkTracerProvider, InitError> {
    let server_url = config.server_url();
    if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
        return Err(InitError::InvalidConfiguration(format!(
            "server URL must use http or https: {server_url}"
        )));
    }

    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(traces_endpoint(server_url))
        .with_timeout(timeout);

    if let Some(token) = config.secret_token() {
        let headers = HashMap::from([("Authorization".to_string(), format!("Bearer {token}"))]);
        builder = builder.with_headers(headers);
    }

    let exporter = builder
        .build()
        .map_err(|e| InitError::Exporter(Box::new(e)))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(build_resource(config))
        .build())
}
