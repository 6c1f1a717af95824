use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use scribe_core::context::LlmContext;
use scribe_core::errors::GatewayError;
use scribe_core::provider::{GenerationOptions, LlmProvider};
use scribe_core::stream::StreamEvent;

use crate::converter;
use crate::sse::{self, SseParser};

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-002";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const CONTEXT_WINDOW: usize = 2_000_000;

/// Which Google API serves the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeminiEndpoint {
    /// Vertex AI, addressed by GCP project and region.
    VertexAi { project: String, location: String },
    /// Generative Language API (API key auth).
    GenerativeLanguage,
}

/// Credentials attached to every request.
#[derive(Clone)]
pub enum GeminiAuth {
    /// OAuth access token, sent as `Authorization: Bearer`.
    Bearer(SecretString),
    /// API key, sent as `x-goog-api-key`.
    ApiKey(SecretString),
}

impl GeminiAuth {
    /// Read credentials from `GOOGLE_ACCESS_TOKEN` or `GEMINI_API_KEY`.
    pub fn from_env() -> Option<Self> {
        if let Ok(token) = std::env::var("GOOGLE_ACCESS_TOKEN") {
            return Some(Self::Bearer(SecretString::from(token)));
        }
        std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|key| Self::ApiKey(SecretString::from(key)))
    }
}

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub endpoint: GeminiEndpoint,
    pub model: String,
    /// Overrides the scheme+host of the API (tests, proxies).
    pub api_base: Option<String>,
    pub idle_timeout: Duration,
}

impl GeminiConfig {
    pub fn vertex(project: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            endpoint: GeminiEndpoint::VertexAi {
                project: project.into(),
                location: location.into(),
            },
            model: DEFAULT_MODEL.into(),
            api_base: None,
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    pub fn generative_language() -> Self {
        Self {
            endpoint: GeminiEndpoint::GenerativeLanguage,
            model: DEFAULT_MODEL.into(),
            api_base: None,
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    /// Full streaming URL for the configured model.
    pub fn stream_url(&self) -> String {
        match &self.endpoint {
            GeminiEndpoint::VertexAi { project, location } => {
                let base = self
                    .api_base
                    .clone()
                    .unwrap_or_else(|| format!("https://{location}-aiplatform.googleapis.com"));
                format!(
                    "{base}/v1/projects/{project}/locations/{location}/publishers/google/models/{}:streamGenerateContent?alt=sse",
                    self.model
                )
            }
            GeminiEndpoint::GenerativeLanguage => {
                let base = self
                    .api_base
                    .clone()
                    .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into());
                format!("{base}/v1beta/models/{}:streamGenerateContent?alt=sse", self.model)
            }
        }
    }
}

pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
    auth: GeminiAuth,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, auth: GeminiAuth) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config, auth })
    }

    fn build_request(&self, context: &LlmContext, options: &GenerationOptions) -> reqwest::RequestBuilder {
        let body = converter::build_request_body(context, options);
        let req = self.client.post(self.config.stream_url());

        let req = match &self.auth {
            GeminiAuth::Bearer(token) => {
                req.header("Authorization", format!("Bearer {}", token.expose_secret()))
            }
            GeminiAuth::ApiKey(key) => req.header("x-goog-api-key", key.expose_secret()),
        };

        req.header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn context_window(&self) -> usize {
        CONTEXT_WINDOW
    }

    #[instrument(skip(self, context, options), fields(model = %self.config.model, messages = context.messages.len()))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let resp = self
            .build_request(context, options)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let stream = SseStream::with_idle_timeout(resp.bytes_stream(), self.config.idle_timeout);
        Ok(Box::pin(stream))
    }
}

/// Wraps a byte stream from reqwest and yields StreamEvents.
/// Emits a StreamInterrupted error if no bytes arrive within `idle_duration`.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    /// Raw bytes not yet terminated by a blank line. Decoded only once an
    /// event is complete so multi-byte characters may straddle chunks.
    buffer: Vec<u8>,
    pending: Vec<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: Vec::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        // CR is never part of a multi-byte sequence, so dropping it normalizes CRLF safely.
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
    }

    fn drain_complete_events(&mut self) {
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let chunk: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.parse_chunk(&chunk);
        }
    }

    fn parse_chunk(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for (_, data) in sse::parse_sse_lines(&text) {
            let events = self.parser.parse_data(&data);
            self.pending.extend(events);
        }
    }

    fn next_pending(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let event = self.pending.remove(0);
        if event.is_terminal() {
            self.done = true;
            self.pending.clear();
        }
        Some(event)
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if let Some(event) = self.next_pending() {
            return Poll::Ready(Some(event));
        }
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    // Reset idle timer on every chunk
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.push_bytes(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    // Flush whatever is left in the buffer
                    let remaining = std::mem::take(&mut self.buffer);
                    self.parse_chunk(&remaining);
                    let tail = self.parser.finish();
                    self.pending.extend(tail);
                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return Poll::Ready(Some(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
