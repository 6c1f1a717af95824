use crate::errors::GatewayError;
use crate::messages::FinishReason;
use crate::tokens::TokenUsage;

/// Events emitted while a provider streams one turn. Ordering contract:
///
/// Start → TextDelta* → (Done | Error)
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    Done {
        text: String,
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self::Done {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }
}
