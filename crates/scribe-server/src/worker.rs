use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use scribe_core::ids::ConnectionId;
use scribe_engine::{NoopObserver, Orchestrator, Session, TurnObserver};

use crate::manager::ConnectionManager;
use crate::protocol::Outbound;

/// Model work queued by a connection, executed strictly in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    Analyze { repo_url: String },
    Prompt { message: String },
}

pub struct Worker {
    pub connection_id: ConnectionId,
    pub manager: Arc<ConnectionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub stream_deltas: bool,
}

impl Worker {
    /// Drain `jobs` until the connection's sender side is dropped or the
    /// connection is unregistered. A job already running finishes; queued ones
    /// are discarded.
    ///
    /// The worker owns the connection's [`Session`]; it is created by the first
    /// job and dropped when the worker exits.
    #[instrument(skip_all, fields(connection_id = %self.connection_id))]
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        let mut session: Option<Session> = None;

        while let Some(job) = jobs.recv().await {
            if self.manager.get(&self.connection_id).is_none() {
                debug!("connection gone, dropping queued jobs");
                break;
            }
            let session = session.get_or_insert_with(|| {
                let session = self.orchestrator.new_session();
                self.manager
                    .activate_session(&self.connection_id, session.id().clone());
                info!(session_id = %session.id(), "session created");
                session
            });

            let frame = self.execute(job, session).await;
            if !self.manager.deliver(&self.connection_id, &frame).await {
                debug!("connection gone, result discarded");
            }
        }

        debug!("job queue closed, worker exiting");
    }

    async fn execute(&self, job: Job, session: &mut Session) -> Outbound {
        let forward = |delta: &str| {
            self.manager
                .send_to(&self.connection_id, &Outbound::Delta(delta.to_string()));
        };
        let observer: &dyn TurnObserver = if self.stream_deltas {
            &forward
        } else {
            &NoopObserver
        };

        match job {
            Job::Analyze { repo_url } => {
                match self.orchestrator.analyze(&repo_url, session, observer).await {
                    Ok(readme) => Outbound::Readme(readme),
                    Err(e) => Outbound::Error(e.to_string()),
                }
            }
            Job::Prompt { message } => {
                let prompt = self.orchestrator.templates().refine(&message);
                match session.send(&prompt, observer).await {
                    Ok(response) => Outbound::Response(response),
                    Err(e) => Outbound::Error(e.to_string()),
                }
            }
        }
    }
}
