use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use scribe_core::ids::ConnectionId;
use scribe_telemetry::{names, MetricsRecorder};

use crate::manager::{ConnectionManager, Registration};
use crate::protocol::{self, Action, Outbound};
use crate::worker::Job;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Validates inbound frames and turns them into worker jobs.
pub struct Dispatcher {
    pub connection_id: ConnectionId,
    pub manager: Arc<ConnectionManager>,
    pub jobs: mpsc::UnboundedSender<Job>,
    pub metrics: Option<Arc<MetricsRecorder>>,
}

impl Dispatcher {
    /// Handle one text frame. Validation errors are answered immediately;
    /// valid actions are queued behind any work already running.
    pub async fn dispatch(&self, raw: &str) {
        let action = match protocol::parse_action(raw) {
            Ok(action) => action,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "rejected frame");
                self.manager
                    .deliver(&self.connection_id, &Outbound::from(e))
                    .await;
                return;
            }
        };

        if let Some(m) = &self.metrics {
            m.counter_inc(names::ACTIONS_TOTAL, &[("action", action.name())], 1);
        }

        let job = match action {
            Action::Analyze { repo_url } => {
                self.manager
                    .deliver(&self.connection_id, &Outbound::analysis_started())
                    .await;
                Job::Analyze { repo_url }
            }
            Action::Prompt { message } => Job::Prompt { message },
        };
        if self.jobs.send(job).is_err() {
            debug!(connection_id = %self.connection_id, "worker gone, job dropped");
        }
    }
}

/// Drive one WebSocket: a writer task forwards queued frames and pings, a
/// reader task dispatches inbound frames. Returns when either side ends or
/// the connection is cancelled; the connection is unregistered on return.
pub async fn handle_ws_connection(
    socket: WebSocket,
    registration: Registration,
    manager: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
) {
    let Registration {
        id: connection_id,
        outbound: mut rx,
        cancel,
    } = registration;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward frames from the queue to the socket + periodic ping
    let writer_cid = connection_id.clone();
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    // Reader task: dispatch inbound frames, track pongs
    let reader_cid = connection_id.clone();
    let reader_manager = Arc::clone(&manager);
    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = reader_cancel.cancelled() => break,
                msg = ws_rx.next() => msg,
            };
            let Some(Ok(msg)) = msg else { break };
            match msg {
                WsMessage::Text(text) => dispatcher.dispatch(text.as_str()).await,
                WsMessage::Pong(_) => {
                    if let Some(entry) = reader_manager.get(&reader_cid) {
                        entry.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum handles pong automatically
                WsMessage::Binary(_) => {
                    debug!(connection_id = %reader_cid, "ignoring binary frame");
                }
            }
        }
        // Dropping the dispatcher closes the job queue; the worker exits after its current job.
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    cancel.cancel();
    manager.unregister(&connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn setup() -> (Arc<ConnectionManager>, Registration, Dispatcher, mpsc::UnboundedReceiver<Job>) {
        let manager = Arc::new(ConnectionManager::new(32));
        let reg = manager.register(&CancellationToken::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            connection_id: reg.id.clone(),
            manager: manager.clone(),
            jobs: tx,
            metrics: None,
        };
        (manager, reg, dispatcher, rx)
    }

    #[tokio::test]
    async fn analyze_acknowledges_then_queues() {
        let (_manager, mut reg, dispatcher, mut jobs) = setup();
        dispatcher.dispatch(r#"{"action":"analyze","repoUrl":"https://x/r.git"}"#).await;

        assert_eq!(
            reg.outbound.recv().await.unwrap(),
            r#"{"message":"Analysis started..."}"#
        );
        assert_eq!(
            jobs.recv().await.unwrap(),
            Job::Analyze {
                repo_url: "https://x/r.git".into()
            }
        );
    }

    #[tokio::test]
    async fn invalid_frames_answer_without_queueing() {
        let (_manager, mut reg, dispatcher, mut jobs) = setup();
        dispatcher.dispatch(r#"{"action":"prompt"}"#).await;
        dispatcher.dispatch(r#"{"action":"analyze"}"#).await;
        dispatcher.dispatch(r#"{"action":"dance"}"#).await;

        assert_eq!(reg.outbound.recv().await.unwrap(), r#"{"error":"Missing 'message' in prompt"}"#);
        assert_eq!(reg.outbound.recv().await.unwrap(), r#"{"error":"Missing 'repoUrl' in message"}"#);
        assert_eq!(reg.outbound.recv().await.unwrap(), r#"{"error":"Unknown action 'dance'"}"#);
        assert!(jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn prompt_is_queued_without_ack() {
        let (_manager, mut reg, dispatcher, mut jobs) = setup();
        dispatcher.dispatch(r#"{"action":"prompt","message":"more detail"}"#).await;

        assert_eq!(
            jobs.recv().await.unwrap(),
            Job::Prompt {
                message: "more detail".into()
            }
        );
        assert!(reg.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn actions_are_counted() {
        let (_manager, _reg, mut dispatcher, _jobs) = setup();
        let metrics = Arc::new(MetricsRecorder::new());
        dispatcher.metrics = Some(metrics.clone());

        dispatcher.dispatch(r#"{"action":"prompt","message":"a"}"#).await;
        dispatcher.dispatch(r#"{"action":"prompt","message":"b"}"#).await;
        dispatcher.dispatch("not json").await;

        assert_eq!(metrics.counter_get(names::ACTIONS_TOTAL, &[("action", "prompt")]), 2);
    }
}
