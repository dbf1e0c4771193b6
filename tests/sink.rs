//! Integration test for `ElasticsearchSink` against a local HTTP stand-in for
//! an Elasticsearch cluster's `_doc` endpoint.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;

use shadowproxy::config::ElasticsearchConfig;
use shadowproxy::sink::elasticsearch::ElasticsearchSink;
use shadowproxy::sink::{ComparisonType, LogRecord, Sink};

#[derive(Default, Clone)]
struct Captured(Arc<Mutex<Vec<(String, Option<String>, String)>>>);

/// A minimal stand-in for Elasticsearch's `PUT /{index}/_doc` endpoint:
/// captures method/auth-header/body and replies with a canned ack.
async fn spawn_fake_elasticsearch(captured: Captured) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let captured = captured.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req: Request<Incoming>| {
                    let captured = captured.clone();
                    async move {
                        let method = req.method().to_string();
                        let auth = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let body = String::from_utf8_lossy(&body).into_owned();
                        captured.0.lock().unwrap().push((method, auth, body));

                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(201)
                                .body(Full::new(Bytes::from(r#"{"result":"created"}"#)).boxed())
                                .unwrap(),
                        )
                    }
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .http1()
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    addr
}

fn sample_record() -> LogRecord {
    LogRecord {
        url: "/orders/1".into(),
        method: "GET".into(),
        route: "GET:/orders/*".into(),
        headers: vec![("x-request-id".into(), "abc".into())],
        request_body: None,
        main_status: 200,
        test_status: 500,
        main_response_body: Some(r#"{"id":1}"#.into()),
        test_response_body: Some(r#"{"error":"boom"}"#.into()),
        comparison_type: ComparisonType::StatusDiff,
        different_headers: None,
    }
}

#[tokio::test]
async fn stores_record_as_a_json_document_over_http() {
    let captured = Captured::default();
    let addr = spawn_fake_elasticsearch(captured.clone()).await;

    let config = ElasticsearchConfig {
        addresses: vec![format!("http://{addr}")],
        index: "shadow-test".to_string(),
        ..ElasticsearchConfig::default()
    };
    let sink = ElasticsearchSink::new(&config).unwrap();

    sink.store(&sample_record()).await.expect("store should succeed");

    let calls = captured.0.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (method, auth, body) = &calls[0];
    assert_eq!(method, "POST");
    assert!(auth.is_none());
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["url"], "/orders/1");
    assert_eq!(parsed["main_status"], 200);
    assert_eq!(parsed["test_status"], 500);
    assert_eq!(parsed["comparison_type"], "status_diff");
}

#[tokio::test]
async fn sends_api_key_auth_header_when_configured() {
    let captured = Captured::default();
    let addr = spawn_fake_elasticsearch(captured.clone()).await;

    let config = ElasticsearchConfig {
        addresses: vec![format!("http://{addr}")],
        api_key: Some("super-secret".to_string()),
        ..ElasticsearchConfig::default()
    };
    let sink = ElasticsearchSink::new(&config).unwrap();

    sink.store(&sample_record()).await.expect("store should succeed");

    let calls = captured.0.lock().unwrap();
    assert_eq!(calls[0].1.as_deref(), Some("ApiKey super-secret"));
}
