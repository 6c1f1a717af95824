use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scribe_core::ids::{ConnectionId, SessionId};
use scribe_telemetry::{names, MetricsRecorder};

use crate::protocol::Outbound;

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Whether a connection has started its conversation yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    SessionActive(SessionId),
}

/// Book-keeping for one live WebSocket.
pub struct ConnectionEntry {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    state: Mutex<SessionState>,
    last_pong: AtomicU64,
    cancel: CancellationToken,
}

impl ConnectionEntry {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            state: Mutex::new(SessionState::NoSession),
            last_pong: AtomicU64::new(now_secs()),
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registered connection: its id, outbound frames, and a token cancelled on unregister.
pub struct Registration {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
}

/// Every live connection and its session state.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
    max_send_queue: usize,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionManager {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register a new connection. Its token is a child of `parent`.
    pub fn register(&self, parent: &CancellationToken) -> Registration {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let cancel = parent.child_token();
        let entry = Arc::new(ConnectionEntry::new(id.clone(), tx, cancel.clone()));
        self.connections.insert(id.clone(), entry);
        if let Some(m) = &self.metrics {
            m.gauge_inc(names::CONNECTIONS_ACTIVE, &[], 1.0);
        }
        Registration {
            id,
            outbound: rx,
            cancel,
        }
    }

    /// Remove a connection and close its socket tasks. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(id) {
            entry.cancel.cancel();
            if let Some(m) = &self.metrics {
                m.gauge_inc(names::CONNECTIONS_ACTIVE, &[], -1.0);
                if matches!(*entry.state.lock(), SessionState::SessionActive(_)) {
                    m.gauge_inc(names::SESSIONS_ACTIVE, &[], -1.0);
                }
            }
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Record that `id` now owns a conversation. Returns false if it is gone.
    pub fn activate_session(&self, id: &ConnectionId, session_id: SessionId) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        let mut state = entry.state.lock();
        if *state == SessionState::NoSession {
            if let Some(m) = &self.metrics {
                m.gauge_inc(names::SESSIONS_ACTIVE, &[], 1.0);
            }
        }
        *state = SessionState::SessionActive(session_id);
        true
    }

    /// Queue a frame, waiting for room in the queue. Used for frames the client
    /// must see (acks, results, errors). Returns false once the connection is gone.
    pub async fn deliver(&self, id: &ConnectionId, frame: &Outbound) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        entry.tx.send(frame.to_json()).await.is_ok()
    }

    /// Queue a frame without waiting. Drops it if the queue is full or the connection is gone.
    pub fn send_to(&self, id: &ConnectionId, frame: &Outbound) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        let text = frame.to_json();
        match entry.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections holding a conversation.
    pub fn session_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|e| matches!(*e.value().state.lock(), SessionState::SessionActive(_)))
            .count()
    }

    /// Remove connections that haven't answered pings within the timeout.
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_alive())
            .map(|e| e.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            info!(connection_id = %id, "cleaned up dead connection");
        }
        dead.len()
    }
}

/// Start a background task that periodically reaps dead connections.
pub fn start_cleanup_task(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = manager.cleanup_dead_connections();
                    if removed > 0 {
                        info!(removed, "dead connection cleanup");
                    }
                }
            }
        }
    })
}
