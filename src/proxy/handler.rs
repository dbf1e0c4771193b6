use std::time::Instant;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderName, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};

use crate::compare::ComparisonJob;
use crate::proxy::context::{empty_body, full_body, BoxBody, RequestContext};
use crate::server::state::AppState;

/// Handle one incoming HTTP request through the phased lifecycle described
/// in four phases:
///
/// 1. route classification (skip or policy)
/// 2. request body buffering (only when not skipped)
/// 3. main-upstream call + client reply
/// 4. sampler admission + comparison-job handoff
pub async fn handle_request(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let route_key = format!("{}:{}", method.to_ascii_uppercase(), path);

    let (skip, policy) = state.routes.resolve(&method, &path);

    if skip {
        metrics::counter!(
            "route_skip_total",
            "route" => route_key.clone(),
            "method" => method.clone(),
            "reason" => "skip_route",
        )
        .increment(1);
        return Ok(forward_streaming(req, &state, &path_and_query, &route_key, &method).await);
    }

    let mut ctx = RequestContext::new(
        method.clone(),
        path,
        route_key.clone(),
        policy.clone(),
        header_pairs(req.headers()),
        Bytes::new(),
    );

    // Early reject via Content-Length when the upstream declared it, before
    // spending the read.
    if let Some(max) = policy.max_body_bytes {
        if let Some(len) = content_length(req.headers()) {
            if len > max {
                metrics::counter!(
                    "route_skip_total",
                    "route" => route_key.clone(),
                    "method" => method.clone(),
                    "reason" => "body_too_large",
                )
                .increment(1);
                return Ok(ctx.error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
            }
        }
    }

    let (parts, body) = req.into_parts();
    let req_headers = parts.headers;

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to read request body");
            return Ok(ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read request body"));
        }
    };

    if let Some(max) = policy.max_body_bytes {
        if body_bytes.len() as u64 > max {
            metrics::counter!(
                "route_skip_total",
                "route" => route_key.clone(),
                "method" => method.clone(),
                "reason" => "body_too_large",
            )
            .increment(1);
            return Ok(ctx.error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
        }
    }

    ctx.request_body = body_bytes.clone();

    let main_uri = match format!("http://{}{}", state.main_upstream, path_and_query).parse::<hyper::Uri>() {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to build main-upstream uri");
            return Ok(ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"));
        }
    };

    let mut main_req_headers = req_headers.clone();
    remove_hop_headers(&mut main_req_headers);

    let mut builder = Request::builder().method(parts.method.clone()).uri(main_uri);
    for (name, value) in &main_req_headers {
        builder = builder.header(name, value);
    }
    let main_request = match builder.body(full_body(body_bytes.clone())) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to build main-upstream request");
            return Ok(ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"));
        }
    };

    let upstream_start = Instant::now();
    let main_response = match state.main_client.request(main_request).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: main upstream transport error");
            return Ok(ctx.error_response(StatusCode::BAD_GATEWAY, "bad gateway"));
        }
    };
    let upstream_elapsed = upstream_start.elapsed();

    let main_status = main_response.status();
    let main_resp_headers = header_pairs(main_response.headers());
    let main_body_bytes = match main_response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to read main upstream response body");
            return Ok(ctx.error_response(StatusCode::BAD_GATEWAY, "bad gateway"));
        }
    };

    ctx.record_main_response(main_status.as_u16(), main_resp_headers.clone(), main_body_bytes.clone());

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.clone(),
        "upstream" => "main_upstream",
        "route" => route_key.clone(),
    )
    .record(upstream_elapsed.as_secs_f64());

    let response = build_client_response(main_status, &main_resp_headers, main_body_bytes.clone());

    let body_within_cap = policy
        .max_body_bytes
        .map(|max| main_body_bytes.len() as u64 <= max)
        .unwrap_or(true);

    if !body_within_cap {
        metrics::counter!(
            "route_skip_total",
            "route" => route_key.clone(),
            "method" => method.clone(),
            "reason" => "body_too_large",
        )
        .increment(1);
        ctx.record_outcome(main_status.as_u16(), "success");
        return Ok(response);
    }

    if state.sampler.admit(policy.test_probability) {
        ctx.record_outcome(main_status.as_u16(), "success");
        let job = ComparisonJob {
            method: method.clone(),
            path: path_and_query.clone(),
            route_key: route_key.clone(),
            test_upstream: format!("http://{}", state.test_upstream),
            original_headers: header_pairs(&main_req_headers),
            request_body: body_bytes,
            main_status: main_status.as_u16(),
            main_headers: main_resp_headers,
            main_body: main_body_bytes,
            policy,
            client: state.test_client.clone(),
            sink: state.sink.clone(),
        };
        if !state.worker.enqueue(Box::pin(job.run())) {
            metrics::counter!(
                "route_skip_total",
                "route" => route_key.clone(),
                "method" => method,
                "reason" => "queue_full",
            )
            .increment(1);
        }
    } else {
        ctx.record_outcome(main_status.as_u16(), "skipped_probability");
    }

    Ok(response)
}

/// Skip-route path: no buffering, no sampling, no sink — a single
/// streamed pass-through to the main upstream.
async fn forward_streaming(
    req: Request<Incoming>,
    state: &AppState,
    path_and_query: &str,
    route_key: &str,
    method: &str,
) -> Response<BoxBody> {
    let start = Instant::now();
    let uri = match format!("http://{}{}", state.main_upstream, path_and_query).parse::<hyper::Uri>() {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to build main-upstream uri (skip path)");
            return error_body_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;
    remove_hop_headers(&mut headers);

    let mut builder = Request::builder().method(parts.method).uri(uri);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    let upstream_req = match builder.body(body.boxed()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: failed to build skip-path request");
            return error_body_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    let response = match state.main_client.request(upstream_req).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(route = %route_key, error = %e, "proxy: main upstream transport error (skip path)");
            metrics::counter!(
                "http_request_total",
                "status" => "502",
                "method" => method.to_string(),
                "upstream" => "main_upstream",
                "route" => route_key.to_string(),
                "outcome" => "error",
            )
            .increment(1);
            return error_body_response(StatusCode::BAD_GATEWAY, "bad gateway");
        }
    };

    let status = response.status();
    metrics::counter!(
        "http_request_total",
        "status" => status.as_u16().to_string(),
        "method" => method.to_string(),
        "upstream" => "main_upstream",
        "route" => route_key.to_string(),
        "outcome" => "skipped",
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "upstream" => "main_upstream",
        "route" => route_key.to_string(),
    )
    .record(start.elapsed().as_secs_f64());

    let (parts, body) = response.into_parts();
    let mut builder = Response::builder().status(parts.status);
    for (name, value) in &parts.headers {
        builder = builder.header(name, value);
    }
    builder.body(body.boxed()).unwrap_or_else(|_| error_body_response(StatusCode::BAD_GATEWAY, "bad gateway"))
}

fn error_body_response(status: StatusCode, msg: &str) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(format!(r#"{{"error":"{msg}"}}"#)))
        .unwrap()
}

/// Copy the main upstream's status/headers/body to the client. Each value
/// of a multi-valued header is emitted as its own header line via
/// `HeaderMap::append`, never collapsed into `[v1,v2]` text.
fn build_client_response(
    status: http::StatusCode,
    headers: &[(String, String)],
    body: Bytes,
) -> Response<BoxBody> {
    let mut builder = Response::builder().status(status);
    {
        let resp_headers = builder.headers_mut().expect("builder not yet finalized");
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                http::HeaderValue::from_str(value),
            ) {
                resp_headers.append(name, value);
            }
        }
    }
    builder
        .body(if body.is_empty() { empty_body() } else { full_body(body) })
        .unwrap_or_else(|_| error_body_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"))
}

fn header_pairs(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect()
}

fn content_length(headers: &http::HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Strip headers that describe framing for the *incoming* connection and
/// no longer apply once the body has been re-buffered into a fixed-length
/// `Full` body (or, on the skip path, simply shouldn't hop to the next
/// connection verbatim).
fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        TRANSFER_ENCODING,
        CONTENT_LENGTH,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("upgrade"),
    ];
    for h in hop_headers {
        headers.remove(h);
    }
}
