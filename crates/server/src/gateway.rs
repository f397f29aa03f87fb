//! Connection Gateway: forwards one job's progress events to one client.
//!
//! Lifecycle per connection is `Connecting -> Open -> Closed`:
//! - `Connecting`: look the job up. A live job is subscribed to; a job known
//!   only to the store gets its stored terminal state as a single event;
//!   anything else is answered with an error message and close code 4004.
//!   A stored snapshot that never reached a terminal state (its final save
//!   was lost) is closed with 4410, which clients treat as final.
//! - `Open`: every bus event becomes one JSON text frame, in order. A ping
//!   goes out every `ping_interval` so half-open sockets surface as errors.
//! - `Closed`: after the terminal event, end-of-stream, or transport closure.
//!   The subscription is dropped (and so unsubscribed) on the way out.

use std::time::Duration;

use async_trait::async_trait;
use autoinsights_jobs::{JobScheduler, Subscription};
use autoinsights_types::{JobId, ProgressEvent};
use axum::extract::ws::{CloseFrame, Message, WebSocket};

use crate::metrics::ConnectionGauge;

/// Close code sent when the requested job does not exist.
pub const CLOSE_JOB_NOT_FOUND: u16 = 4004;
/// Close code sent when the job is no longer live and its final state was
/// never recorded.
pub const CLOSE_JOB_UNAVAILABLE: u16 = 4410;
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Connecting,
    Open,
    Closed,
}

/// Why a gateway reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    JobNotFound,
    /// Only a non-terminal snapshot of a finished job is left.
    JobUnavailable,
    /// The terminal event was forwarded.
    JobFinished,
    /// The bus ended without a terminal event reaching this subscriber.
    StreamEnded,
    ClientClosed,
    Transport(String),
    Store(String),
}

/// What the client sent us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Pings, pongs and binary frames.
    Other,
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("websocket send failed: {0}")]
pub struct SendError(pub String);

/// The transport under a gateway. Implemented for axum's `WebSocket`; tests
/// drive the gateway through an in-memory implementation.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SendError>;
    async fn send_ping(&mut self) -> Result<(), SendError>;
    async fn recv(&mut self) -> Inbound;
    async fn close(&mut self, code: u16, reason: &'static str);
}

#[async_trait]
impl Connection for WebSocket {
    async fn send_text(&mut self, text: String) -> Result<(), SendError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| SendError(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), SendError> {
        self.send(Message::Ping(Default::default()))
            .await
            .map_err(|e| SendError(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        match WebSocket::recv(self).await {
            Some(Ok(Message::Text(text))) => Inbound::Text(text.to_string()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => Inbound::Closed,
            Some(Ok(_)) => Inbound::Other,
        }
    }

    async fn close(&mut self, code: u16, reason: &'static str) {
        let _ = self
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
}

pub struct ConnectionGateway<C> {
    job_id: JobId,
    conn: C,
    scheduler: JobScheduler,
    ping_interval: Duration,
    state: GatewayState,
}

impl<C: Connection> ConnectionGateway<C> {
    pub fn new(job_id: JobId, conn: C, scheduler: JobScheduler, ping_interval: Duration) -> Self {
        Self {
            job_id,
            conn,
            scheduler,
            ping_interval,
            state: GatewayState::Connecting,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    fn transition(&mut self, next: GatewayState) {
        tracing::debug!(job_id = %self.job_id, from = ?self.state, to = ?next, "gateway state");
        self.state = next;
    }

    /// Run the connection to completion.
    pub async fn serve(&mut self) -> CloseReason {
        let _gauge = ConnectionGauge::open();
        let reason = match self.scheduler.registry().get(&self.job_id) {
            Some(entry) => {
                let subscription = entry.bus.subscribe();
                drop(entry);
                self.transition(GatewayState::Open);
                self.forward(subscription).await
            }
            None => self.serve_stored().await,
        };
        self.transition(GatewayState::Closed);
        tracing::info!(job_id = %self.job_id, reason = ?reason, "progress connection closed");
        reason
    }

    /// The bus is gone (or never existed): answer from the store.
    async fn serve_stored(&mut self) -> CloseReason {
        match self.scheduler.store().load(&self.job_id).await {
            Ok(Some(snapshot)) if !snapshot.is_terminal() => {
                tracing::warn!(
                    job_id = %self.job_id,
                    status = %snapshot.status,
                    "job is gone but its stored state is not terminal"
                );
                let err_msg = serde_json::json!({
                    "type": "error",
                    "message": format!("Job '{}' final status is unavailable", self.job_id),
                });
                let _ = self.conn.send_text(err_msg.to_string()).await;
                self.conn
                    .close(CLOSE_JOB_UNAVAILABLE, "Job status unavailable")
                    .await;
                CloseReason::JobUnavailable
            }
            Ok(Some(snapshot)) => {
                self.transition(GatewayState::Open);
                if let Err(e) = self.send_event(&snapshot.to_event()).await {
                    return CloseReason::Transport(e.0);
                }
                self.conn.close(CLOSE_NORMAL, "job finished").await;
                CloseReason::JobFinished
            }
            Ok(None) => {
                tracing::debug!(job_id = %self.job_id, "progress requested for unknown job");
                let err_msg = serde_json::json!({
                    "type": "error",
                    "message": format!("Job '{}' not found", self.job_id),
                });
                let _ = self.conn.send_text(err_msg.to_string()).await;
                self.conn.close(CLOSE_JOB_NOT_FOUND, "Job not found").await;
                CloseReason::JobNotFound
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "job store lookup failed");
                self.conn
                    .close(CLOSE_INTERNAL, "Status store unavailable")
                    .await;
                CloseReason::Store(e.to_string())
            }
        }
    }

    async fn forward(&mut self, mut subscription: Subscription) -> CloseReason {
        let mut ping = tokio::time::interval(self.ping_interval);
        // Skip the first immediate tick
        ping.tick().await;

        let reason = loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.send_event(&event).await {
                            break CloseReason::Transport(e.0);
                        }
                        if event.is_terminal() {
                            self.conn.close(CLOSE_NORMAL, "job finished").await;
                            break CloseReason::JobFinished;
                        }
                    }
                    None => {
                        self.conn.close(CLOSE_NORMAL, "job finished").await;
                        break CloseReason::StreamEnded;
                    }
                },
                inbound = self.conn.recv() => match inbound {
                    Inbound::Closed => break CloseReason::ClientClosed,
                    Inbound::Text(text) => {
                        tracing::trace!(job_id = %self.job_id, %text, "ignoring client message");
                    }
                    Inbound::Other => {}
                },
                _ = ping.tick() => {
                    if let Err(e) = self.conn.send_ping().await {
                        break CloseReason::Transport(e.0);
                    }
                }
            }
        };

        if subscription.dropped() > 0 {
            tracing::warn!(
                job_id = %self.job_id,
                dropped = subscription.dropped(),
                "slow progress connection missed events"
            );
        }
        reason
    }

    async fn send_event(&mut self, event: &ProgressEvent) -> Result<(), SendError> {
        let text = serde_json::to_string(event).map_err(|e| SendError(e.to_string()))?;
        self.conn.send_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autoinsights_jobs::{
        stage_fn, JobStore, MemoryJobStore, SchedulerConfig, Stage, StageError, StagePlan,
    };
    use autoinsights_types::JobStatus;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, Notify};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Ping,
        Close(u16, String),
    }

    struct FakeConnection {
        sent: mpsc::UnboundedSender<Sent>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn send_text(&mut self, text: String) -> Result<(), SendError> {
            self.sent
                .send(Sent::Text(text))
                .map_err(|e| SendError(e.to_string()))
        }

        async fn send_ping(&mut self) -> Result<(), SendError> {
            self.sent.send(Sent::Ping).map_err(|e| SendError(e.to_string()))
        }

        async fn recv(&mut self) -> Inbound {
            self.inbound.recv().await.unwrap_or(Inbound::Closed)
        }

        async fn close(&mut self, code: u16, reason: &'static str) {
            let _ = self.sent.send(Sent::Close(code, reason.to_string()));
        }
    }

    fn fake() -> (
        FakeConnection,
        mpsc::UnboundedReceiver<Sent>,
        mpsc::UnboundedSender<Inbound>,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            FakeConnection {
                sent: sent_tx,
                inbound: in_rx,
            },
            sent_rx,
            in_tx,
        )
    }

    fn scheduler() -> JobScheduler {
        JobScheduler::new(
            SchedulerConfig::default(),
            Arc::new(MemoryJobStore::default()),
        )
    }

    /// A plan whose first stage waits for `gate`, so viewers can attach
    /// before any progress is published.
    fn gated_plan(gate: Arc<Notify>, weights: &[u8], fail_at: Option<usize>) -> StagePlan {
        let stages = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let gate = Arc::clone(&gate);
                let work = stage_fn(move |ctx| {
                    let gate = Arc::clone(&gate);
                    async move {
                        if ctx.index == 0 {
                            gate.notified().await;
                        }
                        if Some(ctx.index) == fail_at {
                            return Err(StageError::new("disk full"));
                        }
                        Ok(Value::Null)
                    }
                });
                Stage::new(format!("stage-{i}"), w, work)
            })
            .collect();
        StagePlan::new(stages).unwrap()
    }

    async fn wait_for_subscribers(scheduler: &JobScheduler, id: &JobId, n: usize) {
        let entry = scheduler.registry().get(id).unwrap();
        while entry.bus.subscriber_count() < n {
            tokio::task::yield_now().await;
        }
    }

    fn events(sent: &[Sent]) -> Vec<Value> {
        sent.iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(serde_json::from_str(t).unwrap()),
                _ => None,
            })
            .collect()
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Sent>) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Some(s) = rx.recv().await {
            out.push(s);
        }
        out
    }

    #[tokio::test]
    async fn test_forwards_events_in_order_then_closes() {
        let scheduler = scheduler();
        let gate = Arc::new(Notify::new());
        let id = scheduler.submit("eda", gated_plan(gate.clone(), &[40, 60], None), json!({}));

        let (conn, sent_rx, _in_tx) = fake();
        let mut gateway =
            ConnectionGateway::new(id.clone(), conn, scheduler.clone(), Duration::from_secs(60));
        let handle = tokio::spawn(async move {
            let reason = gateway.serve().await;
            (reason, gateway.state())
        });

        wait_for_subscribers(&scheduler, &id, 1).await;
        gate.notify_one();

        let (reason, state) = handle.await.unwrap();
        assert_eq!(reason, CloseReason::JobFinished);
        assert_eq!(state, GatewayState::Closed);

        let sent = drain(sent_rx).await;
        let progress: Vec<u64> = events(&sent)
            .iter()
            .map(|e| e["progress"].as_u64().unwrap())
            .collect();
        assert_eq!(progress, vec![40, 100]);
        assert_eq!(events(&sent)[0]["status"], "running");
        assert_eq!(events(&sent)[1]["status"], "completed");
        assert_eq!(
            sent.last(),
            Some(&Sent::Close(CLOSE_NORMAL, "job finished".to_string()))
        );
        assert_eq!(scheduler.registry().get(&id).unwrap().bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_two_gateways_see_identical_failure_sequence() {
        let scheduler = scheduler();
        let gate = Arc::new(Notify::new());
        let id = scheduler.submit(
            "eda",
            gated_plan(gate.clone(), &[10, 20, 30, 40], Some(2)),
            json!({}),
        );

        let mut receivers = Vec::new();
        let mut handles = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..2 {
            let (conn, sent_rx, in_tx) = fake();
            let mut gateway =
                ConnectionGateway::new(id.clone(), conn, scheduler.clone(), Duration::from_secs(60));
            handles.push(tokio::spawn(async move { gateway.serve().await }));
            receivers.push(sent_rx);
            keep.push(in_tx);
        }
        wait_for_subscribers(&scheduler, &id, 2).await;
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), CloseReason::JobFinished);
        }
        let mut sequences = Vec::new();
        for rx in receivers {
            let evs = events(&drain(rx).await);
            sequences.push(
                evs.iter()
                    .map(|e| {
                        (
                            e["status"].as_str().unwrap().to_string(),
                            e["progress"].as_u64().unwrap(),
                        )
                    })
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(sequences[0], sequences[1]);
        assert_eq!(
            sequences[0],
            vec![
                ("running".to_string(), 10),
                ("running".to_string(), 30),
                ("failed".to_string(), 30),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_job_closes_with_4004() {
        let scheduler = scheduler();
        let (conn, sent_rx, _in_tx) = fake();
        let mut gateway = ConnectionGateway::new(
            JobId::from("does-not-exist"),
            conn,
            scheduler,
            Duration::from_secs(60),
        );

        assert_eq!(gateway.serve().await, CloseReason::JobNotFound);
        drop(gateway);

        let sent = drain(sent_rx).await;
        assert_eq!(sent.len(), 2);
        let err = &events(&sent)[0];
        assert_eq!(err["type"], "error");
        assert_eq!(err["message"], "Job 'does-not-exist' not found");
        assert_eq!(
            sent[1],
            Sent::Close(CLOSE_JOB_NOT_FOUND, "Job not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_late_connection_gets_only_terminal_event() {
        let scheduler = scheduler();
        let gate = Arc::new(Notify::new());
        let id = scheduler.submit("eda", gated_plan(gate.clone(), &[50, 50], None), json!({}));
        gate.notify_one();

        let entry = scheduler.registry().get(&id).unwrap();
        while !entry.bus.is_closed() {
            tokio::task::yield_now().await;
        }

        let (conn, sent_rx, _in_tx) = fake();
        let mut gateway =
            ConnectionGateway::new(id.clone(), conn, scheduler.clone(), Duration::from_secs(60));
        assert_eq!(gateway.serve().await, CloseReason::JobFinished);
        drop(gateway);

        let evs = events(&drain(sent_rx).await);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0]["status"], "completed");
        assert_eq!(evs[0]["progress"], 100);
    }

    #[tokio::test]
    async fn test_job_known_only_to_store_sends_stored_state() {
        let store = Arc::new(MemoryJobStore::default());
        let scheduler = JobScheduler::new(SchedulerConfig::default(), store.clone());

        let record = autoinsights_jobs::JobRecord::new(JobId::from("old-job"), "automl");
        record.start("Running");
        record.finish(autoinsights_jobs::JobOutcome::Failed {
            error: "Stage 'Training models' failed: out of memory".to_string(),
            progress: 25,
        });
        store.save(record.snapshot()).await.unwrap();

        let (conn, sent_rx, _in_tx) = fake();
        let mut gateway = ConnectionGateway::new(
            JobId::from("old-job"),
            conn,
            scheduler,
            Duration::from_secs(60),
        );
        assert_eq!(gateway.serve().await, CloseReason::JobFinished);
        drop(gateway);

        let sent = drain(sent_rx).await;
        let evs = events(&sent);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0]["status"], JobStatus::Failed.as_str());
        assert_eq!(evs[0]["progress"], 25);
        assert_eq!(
            evs[0]["message"],
            "Stage 'Training models' failed: out of memory"
        );
        assert_eq!(sent[1], Sent::Close(CLOSE_NORMAL, "job finished".to_string()));
    }

    #[tokio::test]
    async fn test_stored_non_terminal_state_is_not_replayed() {
        let store = Arc::new(MemoryJobStore::default());
        let scheduler = JobScheduler::new(SchedulerConfig::default(), store.clone());

        // The final save never landed, so only the queued snapshot is left.
        let record = autoinsights_jobs::JobRecord::new(JobId::from("lost-job"), "eda");
        store.save(record.snapshot()).await.unwrap();

        let (conn, sent_rx, _in_tx) = fake();
        let mut gateway = ConnectionGateway::new(
            JobId::from("lost-job"),
            conn,
            scheduler,
            Duration::from_secs(60),
        );
        assert_eq!(gateway.serve().await, CloseReason::JobUnavailable);
        assert_eq!(gateway.state(), GatewayState::Closed);
        drop(gateway);

        let sent = drain(sent_rx).await;
        assert_eq!(sent.len(), 2);
        let err = &events(&sent)[0];
        assert_eq!(err["type"], "error");
        assert!(err.get("status").is_none());
        assert_eq!(
            sent[1],
            Sent::Close(CLOSE_JOB_UNAVAILABLE, "Job status unavailable".to_string())
        );
    }

    #[tokio::test]
    async fn test_client_close_unsubscribes() {
        let scheduler = scheduler();
        let gate = Arc::new(Notify::new());
        let id = scheduler.submit("eda", gated_plan(gate.clone(), &[100], None), json!({}));

        let (conn, _sent_rx, in_tx) = fake();
        let mut gateway =
            ConnectionGateway::new(id.clone(), conn, scheduler.clone(), Duration::from_secs(60));
        let handle = tokio::spawn(async move { gateway.serve().await });

        wait_for_subscribers(&scheduler, &id, 1).await;
        in_tx.send(Inbound::Text("hello".to_string())).unwrap();
        in_tx.send(Inbound::Closed).unwrap();

        assert_eq!(handle.await.unwrap(), CloseReason::ClientClosed);
        assert_eq!(scheduler.registry().get(&id).unwrap().bus.subscriber_count(), 0);

        // The job is unaffected by its viewer leaving.
        gate.notify_one();
        let entry = scheduler.registry().get(&id).unwrap();
        while !entry.bus.is_closed() {
            tokio::task::yield_now().await;
        }
        assert_eq!(entry.record.status(), JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_pinged() {
        let scheduler = scheduler();
        let gate = Arc::new(Notify::new());
        let id = scheduler.submit("eda", gated_plan(gate.clone(), &[100], None), json!({}));

        let (conn, mut sent_rx, _in_tx) = fake();
        let mut gateway =
            ConnectionGateway::new(id.clone(), conn, scheduler.clone(), Duration::from_secs(10));
        let handle = tokio::spawn(async move { gateway.serve().await });

        assert_eq!(sent_rx.recv().await, Some(Sent::Ping));
        assert_eq!(sent_rx.recv().await, Some(Sent::Ping));

        gate.notify_one();
        assert_eq!(handle.await.unwrap(), CloseReason::JobFinished);
    }
}
