//! Server configuration.
//!
//! Defaults are overridden by `AUTOINSIGHTS_*` environment variables, and the
//! binary's command-line flags override those in turn.

use std::net::SocketAddr;
use std::time::Duration;

use autoinsights_jobs::{SchedulerConfig, DEFAULT_QUEUE_CAPACITY};
use autoinsights_types::JobId;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL handed to clients for the WebSocket endpoint, e.g.
    /// `wss://insights.example.com`. Derived from host/port when unset.
    pub public_ws_url: Option<String>,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub bus_retention: Duration,
    pub status_ttl: Duration,
    /// Simulated per-stage duration of the built-in workloads.
    pub stage_delay: Duration,
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            public_ws_url: None,
            max_concurrent_jobs: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            bus_retention: Duration::from_secs(30),
            status_ttl: Duration::from_secs(3600),
            stage_delay: Duration::from_millis(500),
            ping_interval: Duration::from_secs(10),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with whatever `AUTOINSIGHTS_*` variables are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("AUTOINSIGHTS_HOST").unwrap_or(defaults.host),
            port: env_parse("AUTOINSIGHTS_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(defaults.port),
            public_ws_url: std::env::var("AUTOINSIGHTS_PUBLIC_WS_URL").ok(),
            max_concurrent_jobs: env_parse("AUTOINSIGHTS_MAX_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            queue_capacity: env_parse("AUTOINSIGHTS_QUEUE_CAPACITY")
                .unwrap_or(defaults.queue_capacity),
            bus_retention: env_parse("AUTOINSIGHTS_BUS_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.bus_retention),
            status_ttl: env_parse("AUTOINSIGHTS_STATUS_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_ttl),
            stage_delay: env_parse("AUTOINSIGHTS_STAGE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stage_delay),
            ping_interval: env_parse("AUTOINSIGHTS_PING_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ping_interval),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {addr}: {e}"))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            queue_capacity: self.queue_capacity,
            bus_retention: self.bus_retention,
        }
    }

    /// Where a client should connect to watch `job_id`.
    pub fn websocket_url(&self, job_id: &JobId) -> String {
        let base = match &self.public_ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.host == "0.0.0.0" { "localhost" } else { &self.host };
                format!("ws://{host}:{}", self.port)
            }
        };
        format!("{base}/ws/job/{job_id}")
    }
}
