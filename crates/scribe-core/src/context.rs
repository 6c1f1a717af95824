use crate::messages::Message;
use crate::tokens::estimate_message_tokens;

/// The complete conversation sent to a provider on every turn.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub system_instruction: Option<String>,
}

impl LlmContext {
    /// Create an empty context (useful for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single-turn context holding one user message.
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            system_instruction: None,
        }
    }

    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.text.as_str())
    }

    pub fn estimated_tokens(&self) -> usize {
        let system = self
            .system_instruction
            .as_deref()
            .map_or(0, crate::tokens::estimate_text_tokens);
        system + self.messages.iter().map(estimate_message_tokens).sum::<usize>()
    }
}
