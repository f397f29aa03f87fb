// crates/server/src/main.rs
//! Auto-Insights job server binary.
//!
//! Serves the job API and progress WebSocket, and sweeps expired job
//! snapshots out of the status store in the background.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use autoinsights_jobs::{JobStore, MemoryJobStore};
use autoinsights_server::{create_app, init_metrics, AppState, ServerConfig, WorkloadCatalog};
use clap::Parser;

/// How often expired snapshots are purged from the status store.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "autoinsights", version, about = "Auto-Insights job server")]
struct Cli {
    /// Address to bind (overrides AUTOINSIGHTS_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides AUTOINSIGHTS_PORT / PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Jobs allowed to run at once (overrides AUTOINSIGHTS_MAX_JOBS)
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Simulated duration of each workload stage, in milliseconds
    #[arg(long)]
    stage_delay_ms: Option<u64>,

    /// Base URL advertised for progress WebSockets
    #[arg(long)]
    public_ws_url: Option<String>,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_jobs) = self.max_jobs {
            config.max_concurrent_jobs = max_jobs;
        }
        if let Some(ms) = self.stage_delay_ms {
            config.stage_delay = Duration::from_millis(ms);
        }
        if let Some(url) = self.public_ws_url {
            config.public_ws_url = Some(url);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard =
        autoinsights_observability::init_tracing("autoinsights", "info,autoinsights=debug")?;

    let config = cli.apply(ServerConfig::from_env());
    tracing::info!(?config, "starting autoinsights server");

    init_metrics();

    let store = Arc::new(MemoryJobStore::new(config.status_ttl));
    let workloads = WorkloadCatalog::builtin(config.stage_delay);
    let addr = config.bind_addr()?;
    let state = AppState::with_parts(config, store.clone(), workloads);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "expired job snapshots purged"),
                Err(e) => tracing::warn!(error = %e, "job snapshot purge failed"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
