use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

/// Options controlling generation on every turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub safety: Vec<SafetySetting>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 0.0,
            top_p: 0.95,
            safety: SafetySetting::permissive(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmCategory {
    HarmCategoryHateSpeech,
    HarmCategoryDangerousContent,
    HarmCategorySexuallyExplicit,
    HarmCategoryHarassment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    /// Source code routinely trips content filters, so all categories are unblocked.
    pub fn permissive() -> Vec<Self> {
        [
            HarmCategory::HarmCategoryHateSpeech,
            HarmCategory::HarmCategoryDangerousContent,
            HarmCategory::HarmCategorySexuallyExplicit,
            HarmCategory::HarmCategoryHarassment,
        ]
        .into_iter()
        .map(|category| Self {
            category,
            threshold: HarmBlockThreshold::BlockNone,
        })
        .collect()
    }
}

/// Trait implemented by each generative-model backend.
///
/// A call sends the whole conversation and returns a finite, non-restartable
/// stream of events whose text deltas concatenate to the full response.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn context_window(&self) -> usize;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.max_output_tokens, 8192);
        assert!(opts.temperature.abs() < f64::EPSILON);
        assert!((opts.top_p - 0.95).abs() < f64::EPSILON);
        assert_eq!(opts.safety.len(), 4);
        assert!(opts
            .safety
            .iter()
            .all(|s| s.threshold == HarmBlockThreshold::BlockNone));
    }

    #[test]
    fn safety_setting_wire_names() {
        let json = serde_json::to_value(&SafetySetting::permissive()[0]).unwrap();
        assert_eq!(json["category"], "HARM_CATEGORY_HATE_SPEECH");
        assert_eq!(json["threshold"], "BLOCK_NONE");
    }
}
