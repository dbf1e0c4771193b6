use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering the `/metrics`
/// endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called **once** at startup before any
    /// `counter!` / `histogram!` call.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "http_request_total",
            Unit::Count,
            "Total HTTP requests processed, labeled by status/method/upstream/route/outcome"
        );
        describe_histogram!(
            "http_request_duration_seconds",
            Unit::Seconds,
            "Request duration, labeled by method/upstream/route"
        );
        describe_counter!(
            "comparison_results_total",
            Unit::Count,
            "Shadow comparison outcomes, labeled by route/method/kind"
        );
        describe_counter!(
            "route_skip_total",
            Unit::Count,
            "Requests that bypassed the shadow pipeline, labeled by route/method/reason"
        );
        describe_counter!(
            "sink_store_errors_total",
            Unit::Count,
            "Log sink store() failures"
        );
        describe_counter!(
            "comparison_json_parse_errors_total",
            Unit::Count,
            "JSON body parse failures encountered during comparison"
        );
        describe_counter!(
            "test_upstream_errors_total",
            Unit::Count,
            "Test-upstream transport errors that dropped a comparison job"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
