use scribe_core::errors::GatewayError;
use scribe_core::messages::FinishReason;
use scribe_core::stream::StreamEvent;
use scribe_core::tokens::TokenUsage;

use crate::types::StreamChunk;

/// State machine turning Gemini SSE payloads into [`StreamEvent`]s.
#[derive(Default)]
pub struct SseParser {
    started: bool,
    finished: bool,
    text: String,
    usage: Option<TokenUsage>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one `data:` payload and return zero or more StreamEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                events.push(StreamEvent::Error {
                    error: GatewayError::StreamInterrupted(format!("malformed chunk: {e}")),
                });
                return events;
            }
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            let body = match error.status {
                Some(status) => format!("{status}: {}", error.message),
                None => error.message,
            };
            events.push(StreamEvent::Error {
                error: GatewayError::from_status(error.code, body),
            });
            return events;
        }

        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            self.finished = true;
            events.push(StreamEvent::Error {
                error: GatewayError::Blocked(reason),
            });
            return events;
        }

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(TokenUsage {
                input_tokens: usage.prompt_token_count.unwrap_or(0),
                output_tokens: usage.candidates_token_count.unwrap_or(0),
            });
        }

        let Some(candidate) = chunk.candidates.and_then(|c| c.into_iter().next()) else {
            return events;
        };

        if let Some(content) = candidate.content {
            for part in content.parts {
                // Reasoning parts are not part of the answer
                if part.thought == Some(true) {
                    continue;
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    self.text.push_str(&text);
                    events.push(StreamEvent::TextDelta { delta: text });
                }
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finished = true;
            let finish_reason = FinishReason::from_provider(&reason);
            if finish_reason == FinishReason::Safety {
                events.push(StreamEvent::Error {
                    error: GatewayError::Blocked(reason),
                });
            } else {
                events.push(StreamEvent::Done {
                    text: std::mem::take(&mut self.text),
                    finish_reason,
                    usage: self.usage.take(),
                });
            }
        }

        events
    }

    /// Called when the byte stream ends. Emits an error if no finish reason was seen.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::Error {
            error: GatewayError::StreamInterrupted("stream ended without a finish reason".into()),
        }]
    }
}

/// Split raw SSE text into `(event, data)` pairs.
/// Multiple `data:` lines of one event are joined with `\n`; the event name defaults to `message`.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event: Option<String> = None;
    let mut current_data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(event) = line.strip_prefix("event:") {
            current_event = Some(event.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data.push(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() && !current_data.is_empty() {
            events.push((
                current_event.take().unwrap_or_else(|| "message".into()),
                current_data.join("\n"),
            ));
            current_data.clear();
        }
    }

    // Handle trailing event without blank line
    if !current_data.is_empty() {
        events.push((
            current_event.unwrap_or_else(|| "message".into()),
            current_data.join("\n"),
        ));
    }

    events
}
