pub mod comparator;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;

use crate::config::EffectivePolicy;
use crate::proxy::context::BoxBody;
use crate::sink::{ComparisonType, LogRecord, Sink};

pub type UpstreamClient = Client<HttpConnector, BoxBody>;

/// Everything a worker needs to replay one request to the test upstream and
/// compare it against the already-served main response. Built by the
/// front-end, owned by a worker after handoff.
pub struct ComparisonJob {
    pub method: String,
    pub path: String,
    pub route_key: String,
    pub test_upstream: String,
    pub original_headers: Vec<(String, String)>,
    pub request_body: Bytes,
    pub main_status: u16,
    pub main_headers: Vec<(String, String)>,
    pub main_body: Bytes,
    pub policy: Arc<EffectivePolicy>,
    pub client: UpstreamClient,
    pub sink: Arc<dyn Sink>,
}

impl ComparisonJob {
    /// Runs the job to completion. Uses a context detached from the
    /// client's — cancelling the client connection never cancels this.
    pub async fn run(self) {
        let start = Instant::now();
        let (test_status, test_headers, test_body) = match self.call_test_upstream().await {
            Ok(response) => response,
            Err(e) => {
                metrics::counter!(
                    "test_upstream_errors_total",
                    "route" => self.route_key.clone(),
                    "method" => self.method.clone(),
                )
                .increment(1);
                tracing::warn!(error = %e, route = %self.route_key, "test upstream call failed, dropping comparison job");
                return;
            }
        };

        metrics::histogram!(
            "http_request_duration_seconds",
            "method" => self.method.clone(),
            "upstream" => "test_upstream",
            "route" => self.route_key.clone(),
        )
        .record(start.elapsed().as_secs_f64());

        let pair = comparator::ResponsePair {
            main_status: self.main_status,
            test_status,
            main_headers: &self.main_headers,
            test_headers: &test_headers,
            main_body: &self.main_body,
            test_body: &test_body,
        };

        let outcome = comparator::compare(
            &pair,
            self.policy.compare_headers,
            &self.policy.skip_headers,
            &self.policy.skip_json_paths,
        );

        match outcome {
            comparator::Outcome::Identical => {
                metrics::counter!(
                    "comparison_results_total",
                    "route" => self.route_key.clone(),
                    "method" => self.method.clone(),
                    "kind" => "identical",
                )
                .increment(1);
            }
            comparator::Outcome::Diverged { kind, different_headers } => {
                let kind_label = match kind {
                    ComparisonType::StatusDiff => "status_diff",
                    ComparisonType::HeaderDiff => "header_diff",
                    ComparisonType::BodyDiff => "body_diff",
                };
                metrics::counter!(
                    "comparison_results_total",
                    "route" => self.route_key.clone(),
                    "method" => self.method.clone(),
                    "kind" => kind_label,
                )
                .increment(1);

                let record = self.build_log_record(kind, test_status, &test_body, different_headers);
                if let Err(e) = self.sink.store(&record).await {
                    tracing::error!(error = %e, route = %self.route_key, "failed to store comparison record");
                }
            }
        }
    }

    async fn call_test_upstream(&self) -> anyhow::Result<(u16, Vec<(String, String)>, Bytes)> {
        let uri: hyper::Uri = format!("{}{}", self.test_upstream, self.path).parse()?;

        let mut builder = hyper::Request::builder()
            .method(self.method.as_str())
            .uri(uri);
        for (name, value) in &self.original_headers {
            builder = builder.header(name, value);
        }
        let request = builder.body(crate::proxy::context::full_body(self.request_body.clone()))?;

        let response = self.client.request(request).await?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.into_body().collect().await?.to_bytes();

        Ok((status, headers, body))
    }

    fn build_log_record(
        &self,
        kind: ComparisonType,
        test_status: u16,
        test_body: &Bytes,
        different_headers: Option<Vec<String>>,
    ) -> LogRecord {
        let include_bodies = matches!(kind, ComparisonType::HeaderDiff | ComparisonType::BodyDiff)
            && self.policy.store_resp_bodies;

        LogRecord {
            url: self.path.clone(),
            method: self.method.clone(),
            route: self.route_key.clone(),
            headers: self.original_headers.clone(),
            request_body: if self.policy.store_req_body {
                Some(String::from_utf8_lossy(&self.request_body).into_owned())
            } else {
                None
            },
            main_status: self.main_status,
            test_status,
            main_response_body: if include_bodies {
                Some(String::from_utf8_lossy(&self.main_body).into_owned())
            } else {
                None
            },
            test_response_body: if include_bodies {
                Some(String::from_utf8_lossy(test_body).into_owned())
            } else {
                None
            },
            comparison_type: kind,
            different_headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_diff_never_includes_bodies() {
        let kind = ComparisonType::StatusDiff;
        let include_bodies = matches!(kind, ComparisonType::HeaderDiff | ComparisonType::BodyDiff);
        assert!(!include_bodies);
    }

    #[test]
    fn test_header_diff_includes_bodies_when_policy_allows() {
        let kind = ComparisonType::HeaderDiff;
        let include_bodies = matches!(kind, ComparisonType::HeaderDiff | ComparisonType::BodyDiff);
        assert!(include_bodies);
    }
}
