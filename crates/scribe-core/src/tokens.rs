use serde::{Deserialize, Serialize};

use crate::messages::Message;

/// Per-message bookkeeping overhead in the estimate.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Per-turn token usage as reported by the provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Estimate token count for text content.
/// Approximation: chars / 4.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single message.
pub fn estimate_message_tokens(msg: &Message) -> usize {
    MESSAGE_OVERHEAD_TOKENS + estimate_text_tokens(&msg.text)
}
