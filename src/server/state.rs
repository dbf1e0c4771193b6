use std::sync::Arc;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::proxy::context::BoxBody;
use crate::routing::RouteTable;
use crate::sampler::Sampler;
use crate::sink::AnySink;
use crate::worker::WorkerPool;

pub type UpstreamClient = Client<HttpConnector, BoxBody>;

/// Shared, cheaply-cloneable state handed to every connection handler.
///
/// Route table and upstream addresses are immutable after startup
/// so there is no `ArcSwap`/hot-reload here — nothing rebuilds the routing
/// table from a live watch. `worker` is an `Arc<WorkerPool>` rather than an owned value so it
/// can be reached from every handler; `WorkerPool::shutdown` takes `&self`
/// precisely so bootstrap can drive shutdown through its own clone without
/// needing to reclaim sole ownership first.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub metrics: Metrics,
    pub sink: Arc<AnySink>,
    pub worker: Arc<WorkerPool>,
    pub sampler: Arc<Sampler>,
    pub main_client: UpstreamClient,
    pub test_client: UpstreamClient,
    pub main_upstream: Arc<str>,
    pub test_upstream: Arc<str>,
}

impl AppState {
    pub fn new(config: &GatewayConfig, routes: RouteTable, sink: AnySink, metrics: Metrics) -> Self {
        // Both upstreams are reached over plain HTTP/1.1; each gets its own
        // connector so connection pools never mix main and test traffic.
        let main_client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let test_client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            routes: Arc::new(routes),
            metrics,
            sink: Arc::new(sink),
            worker: Arc::new(WorkerPool::spawn(config.worker.count, config.worker.queue_size)),
            sampler: Arc::new(Sampler::new()),
            main_client,
            test_client,
            main_upstream: Arc::from(config.upstreams.main.address.as_str()),
            test_upstream: Arc::from(config.upstreams.test.address.as_str()),
        }
    }
}
