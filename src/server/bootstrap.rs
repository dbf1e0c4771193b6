use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{GatewayConfig, StorageType};
use crate::metrics::Metrics;
use crate::routing::RouteTable;
use crate::server::{self, state::AppState};
use crate::sink::{elasticsearch::ElasticsearchSink, stdout::StdoutSink, AnySink};

/// Worker pool drain grace period on shutdown.
const WORKER_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
}

/// Proxy lifecycle: init → load → serve → shutdown.
///
/// Both upstreams are fixed addresses resolved once at config load
/// so there is no etcd/consul watch loop to keep running after startup.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let config = GatewayConfig::load(&args.config_path)?;
    init_tracing(&config.log_level);

    let global_policy = config.resolve_global_policy();
    let routes = RouteTable::new(&global_policy, &config.route_configs, &config.skip_routes)
        .map_err(|e| anyhow::anyhow!("invalid route pattern at startup: {e}"))?;

    let sink: AnySink = match config.storage_type {
        StorageType::Stdout => AnySink::Stdout(StdoutSink::new()),
        StorageType::Elasticsearch => {
            AnySink::Elasticsearch(ElasticsearchSink::new(&config.elasticsearch)?)
        }
    };

    let metrics = Metrics::install();
    let state = AppState::new(&config, routes, sink, metrics);

    let shutdown = Arc::new(Notify::new());

    let admin_handle = if config.metrics.enabled {
        Some(start_admin_server(state.clone(), config.metrics.bind.clone(), shutdown.clone()))
    } else {
        None
    };

    tracing::info!(
        "server: starting, bind={}, main_upstream={}, test_upstream={}",
        config.bind,
        state.main_upstream,
        state.test_upstream,
    );

    let proxy_handle = tokio::spawn({
        let bind = config.bind.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&bind, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    // Wait for the proxy listener to finish draining in-flight connections
    // before tearing down the worker pool — a comparison job enqueued by
    // the last drained request must still have somewhere to run.
    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }
    if let Some(admin_handle) = admin_handle {
        admin_handle.abort();
    }

    state.worker.shutdown(WORKER_DRAIN_GRACE).await;

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string())))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn start_admin_server(state: AppState, bind: String, shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = server::run_admin_server(&bind, state) => {
                if let Err(e) = result {
                    tracing::error!("server: admin failed, error={}", e);
                }
            }
            _ = shutdown.notified() => {}
        }
    })
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
