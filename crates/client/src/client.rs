//! Client state machine.
//!
//! `Disconnected -> Connecting -> Connected -> Backoff -> Connecting ...`
//!
//! The first connection is made by `connect()` itself so its failure can be
//! reported to the caller. Everything after that runs on a background task
//! that owns the socket: it feeds events to the handler, and on an
//! unexpected closure sleeps per the backoff policy and reconnects, up to
//! `max_attempts` times in a row. A terminal event, a 4004 or 4410 close,
//! exhausted retries, or `disconnect()` end the session for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoinsights_types::{JobId, ProgressEvent};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code the server uses for an unknown job.
const CLOSE_JOB_NOT_FOUND: u16 = 4004;
/// Close code for a finished job whose final state was not recorded.
const CLOSE_JOB_UNAVAILABLE: u16 = 4410;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt `attempt`.
    Backoff { attempt: u32, delay: Duration },
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The job reached a terminal state; this is its terminal event.
    Finished(ProgressEvent),
    /// `disconnect()` was called.
    Disconnected,
    Failed(ClientError),
}

/// Why one connection stopped delivering events.
enum StreamEnd {
    Terminal(ProgressEvent),
    NotFound,
    Unavailable,
    Cancelled,
    Dropped(String),
}

struct Inner {
    url: String,
    job_id: JobId,
    config: ClientConfig,
    cancel: CancellationToken,
    state: watch::Sender<ClientState>,
    outcome: watch::Sender<Option<SessionOutcome>>,
}

impl Inner {
    fn set_state(&self, next: ClientState) {
        // Once disconnected by the caller, nothing may move us back out.
        if self.cancel.is_cancelled() && next != ClientState::Disconnected {
            return;
        }
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(job_id = %self.job_id, from = ?prev, to = ?next, "client state");
        }
    }

    fn finish(&self, outcome: SessionOutcome) {
        self.set_state(ClientState::Disconnected);
        self.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    /// One handshake, bounded by `connect_timeout` and abandoned on cancel.
    async fn open(&self) -> Result<WsStream, ClientError> {
        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::ConnectFailed("cancelled".to_string())),
            result = attempt => match result {
                Ok(Ok((stream, _))) => Ok(stream),
                Ok(Err(e)) => Err(ClientError::ConnectFailed(e.to_string())),
                Err(_) => Err(ClientError::ConnectFailed("connect timed out".to_string())),
            },
        }
    }

    async fn read_stream<H>(&self, stream: &mut WsStream, handler: &mut H) -> StreamEnd
    where
        H: FnMut(ProgressEvent),
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = stream.close(None).await;
                    return StreamEnd::Cancelled;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ProgressEvent>(&text) {
                            Ok(event) if event.is_terminal() => {
                                handler(event.clone());
                                return StreamEnd::Terminal(event);
                            }
                            Ok(event) => handler(event),
                            Err(e) => {
                                tracing::warn!(
                                    job_id = %self.job_id,
                                    error = %e,
                                    "ignoring malformed progress message"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        match code {
                            Some(CLOSE_JOB_NOT_FOUND) => return StreamEnd::NotFound,
                            Some(CLOSE_JOB_UNAVAILABLE) => return StreamEnd::Unavailable,
                            _ => {}
                        }
                        return StreamEnd::Dropped(format!("closed by server ({code:?})"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return StreamEnd::Dropped(e.to_string()),
                    None => return StreamEnd::Dropped("stream ended".to_string()),
                },
            }
        }
    }

    /// Drive the session from an established connection until it ends.
    async fn run<H>(self: Arc<Self>, mut stream: WsStream, mut handler: H)
    where
        H: FnMut(ProgressEvent),
    {
        let outcome = 'session: loop {
            let reason = match self.read_stream(&mut stream, &mut handler).await {
                StreamEnd::Terminal(event) => break SessionOutcome::Finished(event),
                StreamEnd::NotFound => {
                    break SessionOutcome::Failed(ClientError::JobNotFound(self.job_id.to_string()))
                }
                StreamEnd::Unavailable => {
                    break SessionOutcome::Failed(ClientError::JobUnavailable(
                        self.job_id.to_string(),
                    ))
                }
                StreamEnd::Cancelled => break SessionOutcome::Disconnected,
                StreamEnd::Dropped(reason) => reason,
            };
            tracing::warn!(job_id = %self.job_id, %reason, "progress connection lost");

            let mut attempt = 0;
            stream = loop {
                attempt += 1;
                if attempt > self.config.max_attempts {
                    break 'session SessionOutcome::Failed(ClientError::RetriesExhausted {
                        attempts: self.config.max_attempts,
                    });
                }
                let delay = self.config.backoff.delay(attempt);
                self.set_state(ClientState::Backoff { attempt, delay });
                tokio::select! {
                    _ = self.cancel.cancelled() => break 'session SessionOutcome::Disconnected,
                    _ = tokio::time::sleep(delay) => {}
                }

                self.set_state(ClientState::Connecting);
                match self.open().await {
                    Ok(stream) => {
                        tracing::info!(job_id = %self.job_id, attempt, "reconnected");
                        self.set_state(ClientState::Connected);
                        break stream;
                    }
                    Err(_) if self.cancel.is_cancelled() => {
                        break 'session SessionOutcome::Disconnected
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %self.job_id, attempt, error = %e, "reconnect failed");
                    }
                }
            };
        };

        tracing::debug!(job_id = %self.job_id, outcome = ?outcome, "progress session ended");
        self.finish(outcome);
    }
}

/// Follows one job's progress stream.
///
/// Dropping the client disconnects it.
pub struct ReconnectingClient {
    inner: Arc<Inner>,
    started: AtomicBool,
}

impl ReconnectingClient {
    /// `base_url` is the server's WebSocket origin, e.g. `ws://localhost:8000`.
    pub fn new(base_url: &str, job_id: JobId, config: ClientConfig) -> Self {
        let url = format!("{}/ws/job/{}", base_url.trim_end_matches('/'), job_id);
        Self::with_url(url, job_id, config)
    }

    /// Use a full progress URL as returned by job submission.
    pub fn with_url(url: impl Into<String>, job_id: JobId, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                job_id,
                config,
                cancel: CancellationToken::new(),
                state,
                outcome,
            }),
            started: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn job_id(&self) -> &JobId {
        &self.inner.job_id
    }

    /// Open the first connection and start delivering events to `handler`.
    ///
    /// Resolves once that connection is established; a failed first attempt
    /// is returned as `ConnectFailed` and is not retried. If `disconnect()`
    /// interrupts that attempt the error is still returned, but the session
    /// ends as `Disconnected`. May be called once.
    pub async fn connect<H>(&self, handler: H) -> Result<(), ClientError>
    where
        H: FnMut(ProgressEvent) + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyStarted);
        }
        let inner = Arc::clone(&self.inner);
        inner.set_state(ClientState::Connecting);
        match inner.open().await {
            Ok(stream) => {
                tracing::info!(job_id = %inner.job_id, url = %inner.url, "connected");
                inner.set_state(ClientState::Connected);
                tokio::spawn(Arc::clone(&inner).run(stream, handler));
                Ok(())
            }
            Err(e) if inner.cancel.is_cancelled() => {
                tracing::debug!(job_id = %inner.job_id, "initial connection cancelled");
                inner.finish(SessionOutcome::Disconnected);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(job_id = %inner.job_id, error = %e, "initial connection failed");
                inner.finish(SessionOutcome::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop following the job. Cancels any pending reconnect and closes the
    /// live connection. Safe to call any number of times.
    pub fn disconnect(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.set_state(ClientState::Disconnected);
        if !self.started.load(Ordering::Acquire) {
            self.inner.finish(SessionOutcome::Disconnected);
        }
        tracing::debug!(job_id = %self.inner.job_id, "disconnect requested");
    }

    pub fn current_state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions, e.g. to report retries.
    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Wait for the session to end. Returns immediately if it already has.
    pub async fn finished(&self) -> SessionOutcome {
        let mut rx = self.inner.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(SessionOutcome::Disconnected),
            Err(_) => SessionOutcome::Disconnected,
        };
        outcome
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
