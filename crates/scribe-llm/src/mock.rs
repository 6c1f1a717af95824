use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;
use parking_lot::Mutex;

use scribe_core::context::LlmContext;
use scribe_core::errors::GatewayError;
use scribe_core::provider::{GenerationOptions, LlmProvider};
use scribe_core::stream::StreamEvent;

type Responder = dyn Fn(&LlmContext) -> String + Send + Sync;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone)]
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A complete answer delivered as a single delta.
    pub fn stream_text(text: &str) -> Self {
        Self::stream_chunks(&[text])
    }

    /// A complete answer delivered as several deltas.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(StreamEvent::done(chunks.concat()));
        Self::Stream(events)
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
///
/// Every context it receives is recorded so tests can assert on what the
/// conversation looked like at each turn. Once the script is exhausted the
/// responder (if any) answers; otherwise the call fails.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    contexts: Mutex<Vec<LlmContext>>,
    responder: Option<Box<Responder>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            responder: None,
        }
    }

    /// Provider that answers every turn by calling `responder`.
    pub fn with_responder(
        responder: impl Fn(&LlmContext) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    /// Scripted responses first, then `responder` for anything beyond.
    pub fn then_respond(
        mut self,
        responder: impl Fn(&LlmContext) -> String + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every context passed to `stream`, in call order.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> usize {
        2_000_000
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.clone());

        let response = match (self.responses.get(idx), &self.responder) {
            (Some(response), _) => response.clone(),
            (None, Some(responder)) => MockResponse::stream_text(&responder(context)),
            (None, None) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "MockProvider: no response configured for call {idx}"
                )))
            }
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
