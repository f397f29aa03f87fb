//! `autoinsights-watch`: follow a job's progress from the terminal.
//!
//! Exit status: 0 when the job completed, 1 when it failed, 2 when the job
//! is unknown or the connection could not be kept up.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use autoinsights_client::{
    Backoff, ClientConfig, ClientError, ClientState, ReconnectingClient, SessionOutcome,
};
use autoinsights_types::{JobId, JobStatus};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Parser)]
#[command(name = "autoinsights-watch", version, about = "Follow a job's progress")]
struct Cli {
    /// Job to follow
    job_id: String,

    /// Server WebSocket origin
    #[arg(long, env = "AUTOINSIGHTS_WS_URL", default_value = "ws://localhost:8000")]
    server: String,

    /// Reconnect attempts after a dropped connection
    #[arg(long, default_value_t = 5)]
    attempts: u32,

    /// Seconds between reconnect attempts (first delay when --exponential)
    #[arg(long, default_value_t = 3)]
    retry_secs: u64,

    /// Double the delay after each failed attempt, up to 30s
    #[arg(long)]
    exponential: bool,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let interval = Duration::from_secs(self.retry_secs);
        let backoff = if self.exponential {
            Backoff::Exponential {
                initial: interval,
                max: Duration::from_secs(30),
            }
        } else {
            Backoff::Fixed(interval)
        };
        ClientConfig {
            max_attempts: self.attempts,
            backoff,
            ..ClientConfig::default()
        }
    }
}

fn exit_status(outcome: &SessionOutcome) -> u8 {
    match outcome {
        SessionOutcome::Finished(event) if event.status == JobStatus::Completed => 0,
        SessionOutcome::Finished(_) => 1,
        SessionOutcome::Disconnected | SessionOutcome::Failed(_) => 2,
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.client_config();
    let client = ReconnectingClient::new(&cli.server, JobId::from(cli.job_id.as_str()), config);

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner} [{bar:40}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut states = client.state();
    let notices = pb.clone();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                ClientState::Backoff { attempt, delay } => notices.println(format!(
                    "  connection lost, retry {attempt} in {}s",
                    delay.as_secs_f32()
                )),
                ClientState::Connected => notices.set_message("connected"),
                _ => {}
            }
        }
    });

    let bar = pb.clone();
    let connected = client
        .connect(move |event| {
            bar.set_position(u64::from(event.progress));
            bar.set_message(event.message);
        })
        .await;
    if let Err(e) = connected {
        pb.abandon_with_message(e.to_string());
        return Ok(ExitCode::from(2));
    }

    tokio::select! {
        outcome = client.finished() => {
            match &outcome {
                SessionOutcome::Finished(event) if event.status == JobStatus::Completed => {
                    pb.finish_with_message(event.message.clone());
                }
                SessionOutcome::Finished(event) => {
                    pb.abandon_with_message(format!("failed: {}", event.message));
                }
                SessionOutcome::Failed(ClientError::JobNotFound(id)) => {
                    pb.abandon_with_message(format!("job '{id}' not found"));
                }
                SessionOutcome::Failed(ClientError::JobUnavailable(id)) => {
                    pb.abandon_with_message(format!("job '{id}' status unavailable"));
                }
                SessionOutcome::Failed(e) => pb.abandon_with_message(e.to_string()),
                SessionOutcome::Disconnected => pb.abandon(),
            }
            Ok(ExitCode::from(exit_status(&outcome)))
        }
        _ = tokio::signal::ctrl_c() => {
            client.disconnect();
            pb.abandon_with_message("interrupted");
            Ok(ExitCode::from(2))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = match autoinsights_observability::init_tracing("autoinsights-watch", "warn") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: {e}");
            None
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
