//! Condition Monitor server
//!
//! Accepts machine connections on the ingest port, aggregates their sensor
//! streams into rollups and serves live namespaces over HTTP/WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: HTTP on 0.0.0.0:8081, ingest on 0.0.0.0:8082
//! cargo run --release
//!
//! # Explicit config and addresses
//! ./condition-monitor --config monitor.toml --addr 127.0.0.1:9000 --ingest-addr 0.0.0.0:9001
//! ```
//!
//! # Environment Variables
//!
//! - `MONITOR_CONFIG`: Path to the TOML configuration
//! - `MONITOR_HTTP_ADDR` / `MONITOR_INGEST_ADDR`: Address overrides
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use condition_monitor::api::{create_app, ApiState};
use condition_monitor::config::MonitorConfig;
use condition_monitor::fanout::HubHandle;
use condition_monitor::ingest::{bridge, spawn_listener};
use condition_monitor::notify;
use condition_monitor::pipeline::{AggregationEngine, AggregationLoop, EngineConfig, SystemClock};
use condition_monitor::storage::{RollupStore, SledStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "condition-monitor")]
#[command(about = "Industrial condition monitoring server")]
#[command(version)]
struct CliArgs {
    /// Override the HTTP/WebSocket bind address
    #[arg(short, long, env = "MONITOR_HTTP_ADDR")]
    addr: Option<String>,

    /// Override the machine ingest bind address
    #[arg(long, env = "MONITOR_INGEST_ADDR", value_name = "HOST:PORT")]
    ingest_addr: Option<String>,

    /// Configuration file (otherwise $MONITOR_CONFIG, ./monitor.toml, defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Aggregation,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Aggregation => write!(f, "Aggregation"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Watch the tasks until all finish. A failing or panicking task cancels the
/// rest.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => {
                info!("Supervisor: task {} completed", task_name);
                // either task ending means the server is going down
                cancel_token.cancel();
            }
            Ok(Err(e)) => {
                error!("Supervisor: task failed with error: {}", e);
                cancel_token.cancel();
                return Err(e);
            }
            Err(e) => {
                error!("Supervisor: task panicked: {}", e);
                cancel_token.cancel();
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    info!("Supervisor: all tasks completed");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::load(),
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(addr) = args.ingest_addr {
        config.ingest.addr = addr;
    }
    config.validate().context("invalid configuration")?;

    info!("Condition Monitor starting");
    info!("   HTTP:   {}", config.server.addr);
    info!("   Ingest: {}", config.ingest.addr);
    info!("   Store:  {}", config.storage.db_path.display());

    let store: Arc<dyn RollupStore> = Arc::new(
        SledStore::open(&config.storage.db_path).context("opening rollup store")?,
    );
    let notifier = notify::from_config(&config.notify).context("building notifier")?;
    info!("   Notify: {}", notifier.name());

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let (bridge_tx, bridge_rx) = bridge();
    let (hub, hub_commands) = HubHandle::channel();

    let engine = AggregationEngine::new(
        EngineConfig::from(&config),
        Arc::new(SystemClock),
        store,
        notifier,
    );

    let http_listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("binding HTTP on {}", config.server.addr))?;
    let app = create_app(ApiState::new(hub), &config.server);

    let listener = spawn_listener(
        &config.ingest.addr,
        config.ingest.max_frame_bytes,
        bridge_tx,
        cancel_token.clone(),
    )
    .context("starting ingest listener")?;

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, http_listener, app, cancel_token.clone());

    // The aggregation loop ends once the listener closes the bridge.
    task_set.spawn(async move {
        info!("[Aggregation] Task starting");
        AggregationLoop::new(engine, bridge_rx, hub_commands).run().await;
        Ok(TaskName::Aggregation)
    });

    let result = run_supervisor(&mut task_set, cancel_token).await;

    tokio::task::spawn_blocking(move || listener.join())
        .await
        .context("joining ingest listener")?;

    result?;
    info!("Condition Monitor shutdown complete");
    Ok(())
}
