use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};

use crate::config::EffectivePolicy;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

/// Per-request context. Created on
/// request arrival, owned by the front-end until handoff to the worker
/// queue, after which the comparison job owns it exclusively.
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub route_key: String,
    pub policy: Arc<EffectivePolicy>,
    pub original_headers: Vec<(String, String)>,
    pub request_body: Bytes,

    pub main_status: u16,
    pub main_headers: Vec<(String, String)>,
    pub main_body: Bytes,
}

impl RequestContext {
    pub fn new(
        method: String,
        path: String,
        route_key: String,
        policy: Arc<EffectivePolicy>,
        original_headers: Vec<(String, String)>,
        request_body: Bytes,
    ) -> Self {
        Self {
            method,
            path,
            route_key,
            policy,
            original_headers,
            request_body,
            main_status: 0,
            main_headers: Vec::new(),
            main_body: Bytes::new(),
        }
    }

    pub fn record_main_response(&mut self, status: u16, headers: Vec<(String, String)>, body: Bytes) {
        self.main_status = status;
        self.main_headers = headers;
        self.main_body = body;
    }

    /// Build a JSON error response and emit the terminal request metrics in
    /// one place — the single exit point for front-end error paths.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        self.record_outcome(status.as_u16(), "error");

        hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(format!(r#"{{"error":"{msg}"}}"#)))
            .unwrap()
    }

    /// `outcome` is one of `success | error | skipped | skipped_probability`
    /// per the `http_request_total` label set. Exactly one call per request —
    /// the duration histogram for `main_upstream` is owned by the call site
    /// that actually measures the upstream round-trip, not this counter.
    pub fn record_outcome(&self, status: u16, outcome: &str) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status);

        metrics::counter!(
            "http_request_total",
            "status" => status_str.to_owned(),
            "method" => self.method.clone(),
            "upstream" => "main_upstream",
            "route" => self.route_key.clone(),
            "outcome" => outcome.to_string(),
        )
        .increment(1);
    }
}
