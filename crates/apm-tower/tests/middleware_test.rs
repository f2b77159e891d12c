//! Integration tests for the request middleware (Layer/Service).
//!
//! These tests verify that the ApmLayer correctly:
//! - Forwards status, headers and body bytes untouched
//! - Begins and ends exactly one transaction per request
//! - Maps statuses to results and lets errors override them
//! - Captures and re-raises handler and body errors

use apm_client::{Client, RecordingCollector, TransactionResult};
use apm_configuration::Configuration;
use apm_tower::{
    ApmLayer, BoxError, Handler, Request, ResponseBody, SharedHandler, StartResponse, handler_fn,
};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tower::{Layer, ServiceBuilder};

#[derive(Debug)]
struct ValueError(String);

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValueError {}

fn recording_client() -> (Client, Arc<RecordingCollector>) {
    let config = Configuration::builder()
        .service_name("erpnext")
        .server_url("http://apm-server:8200")
        .build()
        .unwrap();
    let recorder = Arc::new(RecordingCollector::new());
    (Client::from_shared(recorder.clone(), config), recorder)
}

fn get(path: &str) -> Request {
    Request::new(Method::GET, path).header("host", "erp.local").unwrap()
}

/// Captures what the host would see from the response-start callback.
#[derive(Default)]
struct HostResponse {
    starts: Vec<(StatusCode, HeaderMap)>,
}

impl StartResponse for HostResponse {
    fn start_response(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.starts.push((status, headers.clone()));
    }
}

fn status_handler(status: StatusCode) -> impl Handler {
    handler_fn(move |_, start| {
        start.start_response(status, &HeaderMap::new());
        Ok(ResponseBody::from_chunks(["ok"]))
    })
}

#[test]
fn test_materialized_body_ends_before_return() {
    let (client, recorder) = recording_client();
    let observed = recorder.clone();

    let app = handler_fn(move |_, start| {
        start.start_response(StatusCode::OK, &HeaderMap::new());
        assert_eq!(observed.transactions()[0].end_count, 0);
        Ok(ResponseBody::from_chunks(["a", "b", "c"]))
    });
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let body = service.call(get("/orders"), &mut host).unwrap();

    let txs = recorder.transactions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].name.as_deref(), Some("GET /orders"));
    assert_eq!(txs[0].transaction_type, "request");
    assert_eq!(txs[0].result, Some(TransactionResult::Success));
    assert_eq!(txs[0].end_count, 1);

    assert!(!body.is_streamed());
    assert_eq!(
        body.collect().unwrap(),
        vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
    );
}

#[test]
fn test_streamed_body_error_is_captured_once_and_reraised() {
    let (client, recorder) = recording_client();

    let app = handler_fn(|_, start| {
        start.start_response(StatusCode::OK, &HeaderMap::new());
        let chunks: Vec<Result<Bytes, BoxError>> = vec![
            Ok(Bytes::from("row 1\n")),
            Err(Box::new(ValueError("invalid literal for int()".into())) as BoxError),
            Ok(Bytes::from("row 3\n")),
        ];
        Ok(ResponseBody::streamed(chunks.into_iter()))
    });
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let request = Request::new(Method::POST, "/submit").header("host", "erp.local").unwrap();
    let body = service.call(request, &mut host).unwrap();
    assert!(body.is_streamed());
    assert_eq!(recorder.transactions()[0].end_count, 0);

    let ResponseBody::Streamed(mut stream) = body else {
        panic!("expected streamed body");
    };
    assert_eq!(stream.next().unwrap().unwrap(), Bytes::from("row 1\n"));

    let err = stream.next().unwrap().unwrap_err();
    let value_error = err.downcast_ref::<ValueError>().unwrap();
    assert_eq!(value_error.0, "invalid literal for int()");
    assert!(stream.next().is_none());
    drop(stream);

    let txs = recorder.transactions();
    assert_eq!(txs[0].name.as_deref(), Some("POST /submit"));
    assert_eq!(txs[0].result, Some(TransactionResult::Error));
    assert_eq!(txs[0].exceptions.len(), 1);
    assert_eq!(txs[0].exceptions[0].message, "invalid literal for int()");
    assert_eq!(txs[0].end_count, 1);
}

#[test]
fn test_handler_error_before_body() {
    let (client, recorder) = recording_client();

    let app = handler_fn(|_, _| Err(Box::new(ValueError("no such doctype".into())) as BoxError));
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let err = service.call(get("/app/todo"), &mut host).unwrap_err();

    assert!(err.downcast_ref::<ValueError>().is_some());
    assert!(host.starts.is_empty());

    let txs = recorder.transactions();
    assert_eq!(txs[0].result, Some(TransactionResult::Error));
    assert_eq!(txs[0].exceptions.len(), 1);
    assert_eq!(txs[0].exceptions[0].message, "no such doctype");
    assert_eq!(txs[0].end_count, 1);
}

#[test]
fn test_empty_bodies_end_once() {
    let (client, recorder) = recording_client();

    let materialized = ApmLayer::new(client.clone()).layer(handler_fn(|_, start| {
        start.start_response(StatusCode::NO_CONTENT, &HeaderMap::new());
        Ok(ResponseBody::empty())
    }));
    let streamed = ApmLayer::new(client).layer(handler_fn(|_, start| {
        start.start_response(StatusCode::NO_CONTENT, &HeaderMap::new());
        Ok(ResponseBody::streamed(std::iter::empty()))
    }));

    let mut host = HostResponse::default();
    assert!(
        materialized
            .call(get("/a"), &mut host)
            .unwrap()
            .collect()
            .unwrap()
            .is_empty()
    );
    assert!(
        streamed
            .call(get("/b"), &mut host)
            .unwrap()
            .collect()
            .unwrap()
            .is_empty()
    );

    for tx in recorder.transactions() {
        assert_eq!(tx.end_count, 1);
        assert_eq!(tx.result, Some(TransactionResult::Success));
    }
}

#[test]
fn test_status_mapping() {
    for (status, expected) in [
        (StatusCode::OK, TransactionResult::Success),
        (StatusCode::FOUND, TransactionResult::Success),
        (StatusCode::NOT_FOUND, TransactionResult::ClientError),
        (StatusCode::INTERNAL_SERVER_ERROR, TransactionResult::ServerError),
    ] {
        let (client, recorder) = recording_client();
        let service = ApmLayer::new(client).layer(status_handler(status));

        let mut host = HostResponse::default();
        service.call(get("/"), &mut host).unwrap();

        assert_eq!(recorder.transactions()[0].result, Some(expected), "{status}");
    }
}

#[test]
fn test_status_headers_and_bytes_pass_through() {
    let (client, _) = recording_client();

    let app = handler_fn(|_, start| {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("set-cookie", HeaderValue::from_static("sid=abc"));
        start.start_response(StatusCode::CREATED, &headers);
        Ok(ResponseBody::from_chunks([
            Bytes::from_static(b"{\"name\":"),
            Bytes::from_static(b"\"ToDo-0001\"}"),
        ]))
    });
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let body = service.call(get("/api/resource/ToDo"), &mut host).unwrap();

    assert_eq!(host.starts.len(), 1);
    assert_eq!(host.starts[0].0, StatusCode::CREATED);
    assert_eq!(host.starts[0].1["content-type"], "application/json");
    assert_eq!(host.starts[0].1["set-cookie"], "sid=abc");
    assert_eq!(
        body.collect().unwrap().concat(),
        b"{\"name\":\"ToDo-0001\"}".to_vec()
    );
}

#[test]
fn test_request_reaches_handler_unchanged() {
    let (client, recorder) = recording_client();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_handler = seen.clone();

    let app = handler_fn(move |request, start| {
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.path, "/api/method/save");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.headers["authorization"], "token abc:def");
        seen_in_handler.fetch_add(1, Ordering::SeqCst);
        start.start_response(StatusCode::OK, &HeaderMap::new());
        Ok(ResponseBody::empty())
    });
    let service = ApmLayer::new(client).layer(app);

    let request = Request::new(Method::PUT, "/api/method/save")
        .query("x=1")
        .header("host", "erp.local")
        .unwrap()
        .header("authorization", "token abc:def")
        .unwrap();
    let mut host = HostResponse::default();
    service.call(request, &mut host).unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let context = &recorder.transactions()[0].context["request"];
    assert_eq!(context["url"], "http://erp.local/api/method/save?x=1");
    assert_eq!(context["headers"]["authorization"], "[REDACTED]");
}

#[test]
fn test_context_failure_does_not_abort_request() {
    let (client, recorder) = recording_client();
    let service = ApmLayer::new(client).layer(status_handler(StatusCode::OK));

    let mut host = HostResponse::default();
    let body = service
        .call(Request::new(Method::GET, "/no-host"), &mut host)
        .unwrap();

    assert_eq!(body.collect().unwrap(), vec![Bytes::from("ok")]);
    let txs = recorder.transactions();
    assert!(txs[0].context.is_empty());
    assert_eq!(txs[0].end_count, 1);
}

#[test]
fn test_capture_failure_still_reraises() {
    let (client, recorder) = recording_client();
    recorder.fail_captures(true);

    let app = handler_fn(|_, _| Err("database is locked".into()));
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let err = service.call(get("/"), &mut host).unwrap_err();

    assert_eq!(err.to_string(), "database is locked");
    let txs = recorder.transactions();
    assert_eq!(txs[0].result, Some(TransactionResult::Error));
    assert_eq!(txs[0].end_count, 1);
}

#[test]
fn test_abandoned_stream_ends_on_drop() {
    let (client, recorder) = recording_client();

    let app = handler_fn(|_, start| {
        start.start_response(StatusCode::OK, &HeaderMap::new());
        Ok(ResponseBody::streamed(
            std::iter::repeat_with(|| Ok(Bytes::from_static(b"tick"))),
        ))
    });
    let service = ApmLayer::new(client).layer(app);

    let mut host = HostResponse::default();
    let body = service.call(get("/events"), &mut host).unwrap();
    let ResponseBody::Streamed(mut stream) = body else {
        panic!("expected streamed body");
    };
    stream.next();
    stream.next();
    assert_eq!(recorder.transactions()[0].end_count, 0);

    drop(stream);
    assert_eq!(recorder.transactions()[0].end_count, 1);
}

#[test]
fn test_service_builder_composition() {
    let (client, recorder) = recording_client();

    let service = ServiceBuilder::new()
        .layer(ApmLayer::new(client))
        .service(status_handler(StatusCode::OK));

    let shared: SharedHandler = Arc::new(service);
    assert!(shared.is_instrumented());

    let mut host = HostResponse::default();
    shared.call(get("/"), &mut host).unwrap();
    assert_eq!(recorder.transactions().len(), 1);
}

#[test]
fn test_concurrent_requests_are_isolated() {
    const THREADS: usize = 8;
    const REQUESTS: usize = 25;

    let (client, recorder) = recording_client();
    let app = handler_fn(|request, start| {
        let status = if request.path.ends_with("/missing") {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        start.start_response(status, &HeaderMap::new());
        Ok(ResponseBody::streamed(
            vec![Ok(Bytes::from(request.path))].into_iter(),
        ))
    });
    let service: SharedHandler = Arc::new(ApmLayer::new(client).layer(app));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let service = service.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..REQUESTS {
                    let path = if i % 2 == 0 {
                        format!("/w{worker}/r{i}")
                    } else {
                        format!("/w{worker}/missing")
                    };
                    let mut request = Request::new(Method::GET, path);
                    request
                        .headers
                        .insert("host", HeaderValue::from_static("erp.local"));
                    let mut host = HostResponse::default();
                    service.call(request, &mut host).unwrap().collect().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let txs = recorder.transactions();
    assert_eq!(txs.len(), THREADS * REQUESTS);
    for tx in &txs {
        assert_eq!(tx.end_count, 1);
        let name = tx.name.as_deref().unwrap();
        let expected = if name.ends_with("/missing") {
            TransactionResult::ClientError
        } else {
            TransactionResult::Success
        };
        assert_eq!(tx.result, Some(expected), "{name}");
    }
}
