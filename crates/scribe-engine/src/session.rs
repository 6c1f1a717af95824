use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{debug, instrument, warn};

use scribe_core::context::LlmContext;
use scribe_core::errors::GatewayError;
use scribe_core::ids::SessionId;
use scribe_core::messages::Message;
use scribe_core::provider::{GenerationOptions, LlmProvider};
use scribe_core::stream::StreamEvent;
use scribe_core::tokens::estimate_message_tokens;
use scribe_telemetry::{names, MetricsRecorder};

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CONTEXT_BUDGET: usize = 1_900_000;

/// Receives model output fragments as they stream in.
pub trait TurnObserver: Send + Sync {
    fn on_delta(&self, delta: &str);
}

/// Observer that discards every fragment.
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_delta(&self, _delta: &str) {}
}

impl<F> TurnObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_delta(&self, delta: &str) {
        self(delta)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub options: GenerationOptions,
    pub turn_timeout: Duration,
    /// Upper bound on the estimated tokens of history + the outgoing message.
    pub context_budget: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            options: GenerationOptions::default(),
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            context_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

/// One committed exchange. Pinned exchanges are never evicted.
#[derive(Clone, Debug)]
struct Exchange {
    user: Message,
    model: Message,
    pinned: bool,
}

impl Exchange {
    fn estimated_tokens(&self) -> usize {
        estimate_message_tokens(&self.user) + estimate_message_tokens(&self.model)
    }
}

/// A stateful multi-turn conversation with the model.
///
/// Every committed exchange is replayed on later turns. When history grows
/// past the context budget the oldest unpinned exchanges are dropped first.
pub struct Session {
    id: SessionId,
    provider: Arc<dyn LlmProvider>,
    config: SessionConfig,
    history: Vec<Exchange>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Session {
    pub fn new(provider: Arc<dyn LlmProvider>, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            provider,
            config,
            history: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Number of committed exchanges currently in history.
    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    /// Flattened history, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.history
            .iter()
            .flat_map(|x| [x.user.clone(), x.model.clone()])
            .collect()
    }

    /// Send `message` and wait for the full reply.
    pub async fn send(
        &mut self,
        message: &str,
        observer: &dyn TurnObserver,
    ) -> Result<String, GatewayError> {
        self.send_turn(message, false, observer).await
    }

    /// Like [`send`](Self::send), but the exchange survives context eviction.
    pub async fn send_pinned(
        &mut self,
        message: &str,
        observer: &dyn TurnObserver,
    ) -> Result<String, GatewayError> {
        self.send_turn(message, true, observer).await
    }

    #[instrument(skip_all, fields(session_id = %self.id, turn = self.history.len() + 1, pinned = pinned))]
    async fn send_turn(
        &mut self,
        message: &str,
        pinned: bool,
        observer: &dyn TurnObserver,
    ) -> Result<String, GatewayError> {
        let user = Message::user(message);
        let evicted = self.plan_eviction(estimate_message_tokens(&user))?;

        let mut messages: Vec<Message> = self
            .history
            .iter()
            .enumerate()
            .filter(|(i, _)| !evicted.contains(i))
            .flat_map(|(_, x)| [x.user.clone(), x.model.clone()])
            .collect();
        messages.push(user.clone());
        let context = LlmContext {
            messages,
            system_instruction: None,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.turn_timeout,
            stream_turn(self.provider.as_ref(), &context, &self.config.options, observer),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout(self.config.turn_timeout)));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(m) = &self.metrics {
            m.histogram_observe(names::TURN_DURATION_MS, &[], elapsed_ms);
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "turn failed");
                if let Some(m) = &self.metrics {
                    m.counter_inc(names::TURN_FAILURES_TOTAL, &[("kind", e.error_kind())], 1);
                }
                return Err(e);
            }
        };

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicting oldest unpinned exchanges");
            if let Some(m) = &self.metrics {
                m.counter_inc(names::TURNS_EVICTED_TOTAL, &[], evicted.len() as u64);
            }
            let mut idx = 0;
            self.history.retain(|_| {
                let keep = !evicted.contains(&idx);
                idx += 1;
                keep
            });
        }
        self.history.push(Exchange {
            user,
            model: Message::model(reply.clone()),
            pinned,
        });
        if let Some(m) = &self.metrics {
            m.counter_inc(names::TURNS_TOTAL, &[], 1);
        }

        Ok(reply)
    }

    /// Indices of the exchanges to drop so that history plus `incoming`
    /// tokens fit in the budget.
    fn plan_eviction(&self, incoming: usize) -> Result<Vec<usize>, GatewayError> {
        let budget = self
            .config
            .context_budget
            .min(self.provider.context_window());
        let mut total: usize =
            incoming + self.history.iter().map(Exchange::estimated_tokens).sum::<usize>();

        let mut evicted = Vec::new();
        let mut candidates = self
            .history
            .iter()
            .enumerate()
            .filter(|(_, x)| !x.pinned);
        while total > budget {
            let Some((idx, exchange)) = candidates.next() else {
                return Err(GatewayError::ContextWindowExceeded {
                    limit: budget,
                    actual: total,
                });
            };
            total -= exchange.estimated_tokens();
            evicted.push(idx);
        }
        Ok(evicted)
    }
}

/// Stream one reply, forwarding fragments to `observer`.
async fn stream_turn(
    provider: &dyn LlmProvider,
    context: &LlmContext,
    options: &GenerationOptions,
    observer: &dyn TurnObserver,
) -> Result<String, GatewayError> {
    let mut stream = provider.stream(context, options).await?;
    let mut text = String::new();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Start => {}
            StreamEvent::TextDelta { delta } => {
                observer.on_delta(&delta);
                text.push_str(&delta);
            }
            StreamEvent::Done { text: full, .. } => {
                if text.is_empty() {
                    text = full;
                }
                return Ok(text);
            }
            StreamEvent::Error { error } => return Err(error),
        }
    }

    Err(GatewayError::StreamInterrupted(
        "stream ended without Done event".into(),
    ))
}
