//! Tracing setup shared by the `autoinsights` server and the watch CLI.
//!
//! - `RUST_LOG` overrides the caller's default filter
//! - `AUTOINSIGHTS_LOG_FORMAT=json` switches console output to JSON lines
//! - `AUTOINSIGHTS_LOG_DIR` adds a daily-rolling JSON log file

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Anything other than `json` (case-insensitive) is compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self {
            format: LogFormat::parse(std::env::var("AUTOINSIGHTS_LOG_FORMAT").ok().as_deref()),
            dir: std::env::var_os("AUTOINSIGHTS_LOG_DIR")
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Install the global subscriber. Console output goes to stderr so stdout
/// stays free for program output.
///
/// Keep the returned guard alive for the life of the process: dropping it
/// flushes and stops the file writer.
pub fn init_tracing(service: &str, default_filter: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let settings = LogSettings::from_env();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = match settings.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file, guard) = match &settings.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{service}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    if let Some(dir) = &settings.dir {
        tracing::debug!(dir = %dir.display(), "file logging enabled");
    }
    Ok(guard)
}
