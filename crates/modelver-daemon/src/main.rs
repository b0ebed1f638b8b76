//! modelver-daemon - Model template versioning controller
//!
//! Opens the object store, seeds the version cache and runs the template
//! and template version controllers until SIGTERM or SIGINT.
//!
//! # Prometheus Metrics
//!
//! Unless `--no-metrics` is given the daemon serves `/metrics` on the
//! configured port (default 9464). See [`modelver_daemon::metrics`] for the
//! exported families.
//!
//! # Configuration
//!
//! Settings are read from the TOML file given with `--config` (optional).
//! Command-line flags override the file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use modelver_core::config::ModelverConfig;
use modelver_core::store::SqliteStore;
use modelver_daemon::daemon::Daemon;
use modelver_daemon::metrics::{SharedMetricsRegistry, new_shared_registry};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// modelver daemon - numbers model template versions and keeps template
/// status in sync
#[derive(Parser, Debug)]
#[command(name = "modelver-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the store database file (`SQLite`)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Workers per resource kind
    #[arg(long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Port for Prometheus metrics HTTP endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Disable Prometheus metrics HTTP endpoint
    #[arg(long)]
    no_metrics: bool,
}

impl Args {
    /// Loads the configuration file (or defaults) and applies flag overrides.
    fn load_config(&self) -> Result<ModelverConfig> {
        let mut config = match &self.config {
            Some(path) => ModelverConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ModelverConfig::default(),
        };
        if let Some(store) = &self.store {
            config.store.path.clone_from(store);
        }
        if let Some(workers) = self.workers {
            config.controller.workers = workers;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing(&args)?;
    let config = args.load_config()?;

    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&config.store.path).with_context(|| {
        format!("failed to open store at {}", config.store.path.display())
    })?);
    info!(path = %config.store.path.display(), "store opened");

    let metrics_registry = if config.metrics.enabled {
        Some(new_shared_registry().context("failed to create metrics registry")?)
    } else {
        None
    };
    let controller_metrics = metrics_registry
        .as_ref()
        .map(|r| r.controller_metrics().clone());

    let daemon = tokio::task::spawn_blocking({
        let store = Arc::clone(&store);
        let controller = config.controller.clone();
        move || Daemon::new(store, &controller, controller_metrics)
    })
    .await
    .context("daemon setup task failed")?
    .context("failed to seed version cache")?;

    let metrics_task = match &metrics_registry {
        Some(registry) => {
            let addr: SocketAddr = format!("{}:{}", config.metrics.host, config.metrics.port)
                .parse()
                .context("invalid metrics address")?;
            let registry = Arc::clone(registry);
            Some(tokio::spawn(async move {
                if let Err(e) = run_metrics_server(registry, addr).await {
                    error!(error = %e, "metrics server failed");
                }
            }))
        },
        None => None,
    };

    let mut running = daemon.start();
    info!(
        workers = config.controller.workers,
        poll_interval_ms = config.controller.poll_interval_ms,
        "modelver daemon running"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
        result = running.informer_exited() => {
            match result {
                Ok(()) => warn!("informer exited unexpectedly"),
                Err(e) => error!(error = %e, "informer failed"),
            }
        }
    }

    info!("shutting down");
    let result = running.shutdown().await;
    if let Some(task) = metrics_task {
        task.abort();
    }
    result.context("controller shutdown failed")?;
    info!("modelver daemon stopped");
    Ok(())
}

/// Serves `/metrics` in Prometheus text format until the task is aborted.
async fn run_metrics_server(metrics_registry: SharedMetricsRegistry, addr: SocketAddr) -> Result<()> {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let metrics_handler = {
        let registry = Arc::clone(&metrics_registry);
        move || {
            let registry = Arc::clone(&registry);
            async move {
                match registry.encode_text() {
                    Ok(body) => (
                        StatusCode::OK,
                        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                        body,
                    )
                        .into_response(),
                    Err(e) => {
                        error!(error = %e, "failed to encode metrics");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to encode metrics: {e}"),
                        )
                            .into_response()
                    },
                }
            }
        }
    };

    let app = Router::new().route("/metrics", get(metrics_handler)).route(
        "/",
        get(|| async { "modelver-daemon metrics server\n\nGET /metrics - Prometheus metrics endpoint\n" }),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;
    info!(addr = %addr, "metrics HTTP server listening");

    axum::serve(listener, app)
        .await
        .context("metrics server error")?;
    Ok(())
}
