//! Binary entrypoint: parses CLI/env config, wires up tracing and metrics,
//! and runs the Instance controller loop until shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use kube::Client;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::EnvFilter;

use instance_operator_core::{Context, Metrics, OperatorConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconciles Instance custom resources against the database-daemon sidecar")]
struct Args {
    /// Number of instances reconciled concurrently.
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = 4)]
    reconcile_concurrency: u16,

    /// Requeue interval used once a reconcile settles with nothing to do.
    #[arg(long, env = "DEFAULT_REQUEUE_SECONDS", default_value_t = 30)]
    default_requeue_seconds: u64,

    /// Poll interval for in-flight long-running operations against the sidecar.
    #[arg(long, env = "LRO_POLL_INTERVAL_SECONDS", default_value_t = 15)]
    lro_poll_interval_seconds: u64,

    /// Dial timeout when opening the gRPC channel to a pod's database daemon.
    #[arg(long, env = "LRO_DIAL_TIMEOUT_SECONDS", default_value_t = 60)]
    lro_dial_timeout_seconds: u64,

    /// Address the `/healthz` and `/metrics` endpoints bind to.
    #[arg(long, env = "METRICS_BIND_ADDR", default_value = "0.0.0.0:8080")]
    metrics_bind_addr: SocketAddr,
}

impl From<&Args> for OperatorConfig {
    fn from(args: &Args) -> Self {
        OperatorConfig {
            reconcile_concurrency: args.reconcile_concurrency,
            default_requeue: Duration::from_secs(args.default_requeue_seconds),
            lro_poll_interval: Duration::from_secs(args.lro_poll_interval_seconds),
            lro_dial_timeout: Duration::from_secs(args.lro_dial_timeout_seconds),
            ..OperatorConfig::default()
        }
    }
}

#[derive(Clone)]
struct HttpState {
    registry: Registry,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<HttpState>) -> (StatusCode, String) {
    let metric_families = state.registry.gather();
    let mut buf = Vec::new();
    match TextEncoder::new().encode(&metric_families, &mut buf) {
        Ok(()) => (StatusCode::OK, String::from_utf8_lossy(&buf).into_owned()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {e}")),
    }
}

async fn serve_http(addr: SocketAddr, registry: Registry) {
    let app = Router::new().route("/healthz", get(healthz)).route("/metrics", get(metrics)).with_state(HttpState { registry });
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind metrics listener on {addr}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("metrics server exited: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).json().init();

    let args = Args::parse();
    let config = OperatorConfig::from(&args);

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)?;

    let client = Client::try_default().await?;
    let ctx = Context::new(client, config, metrics);

    tracing::info!(bind = %args.metrics_bind_addr, "starting instance-operator");
    tokio::spawn(serve_http(args.metrics_bind_addr, registry));

    instance_operator_core::run(ctx).await;
    Ok(())
}
