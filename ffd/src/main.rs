//! Feature Flag Daemon
//!
//! Serves the admin control plane and the tenant evaluation surface over
//! HTTP, drains the evaluation-log queue, and exports Prometheus metrics.

#![forbid(unsafe_code)]

mod http_api;
mod metrics;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ffd_common::{
    AdminOps, FfdConfig, MemoryFlagStore, MemoryHistoryLog, MemoryOverrideStore, QueueSink,
    ResolutionEngine,
};

use http_api::HttpState;

#[derive(Parser)]
#[command(name = "ffd")]
#[command(author, version, about = "Feature flag daemon - targeting and rollout resolution")]
struct Cli {
    /// Path to config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to audit history file (JSONL format, overrides config)
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let config_path = cli.config.clone().or_else(FfdConfig::default_path);
    let mut config =
        FfdConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.history_file {
        config.history_file = Some(path);
    }

    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("Starting feature flag daemon...");

    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    // Stores
    let flags = Arc::new(MemoryFlagStore::new());
    let overrides = Arc::new(MemoryOverrideStore::new());
    let history = match &config.history_file {
        Some(path) => {
            info!("Persisting audit history to {}", path.display());
            Arc::new(MemoryHistoryLog::new().with_persistence(path.clone()))
        }
        None => Arc::new(MemoryHistoryLog::new()),
    };

    // Evaluation-log queue and drain worker
    let (sink, rx) = QueueSink::bounded(config.eval_log_capacity);
    let _eval_log_worker = worker::spawn_for(&sink, rx);

    let admin = Arc::new(AdminOps::new(flags.clone(), overrides.clone(), history));
    let engine = Arc::new(
        ResolutionEngine::new(flags, overrides)
            .with_salt(config.bucket_salt.clone())
            .with_sink(sink.clone()),
    );

    let state = HttpState {
        admin,
        engine,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };

    let router = http_api::create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl-C handler: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
