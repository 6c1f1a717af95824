//! Wire types for the Gemini `streamGenerateContent` API.

use serde::{Deserialize, Serialize};

use scribe_core::provider::SafetySetting;

// --- Request ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thought: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

// --- Response ---

/// One SSE `data:` payload of a streaming response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub candidates: Option<Vec<Candidate>>,
    pub usage_metadata: Option<UsageMetadata>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: Option<u64>,
    pub candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_deserializes_text_and_usage() {
        let raw = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let candidates = chunk.candidates.unwrap();
        let part = &candidates[0].content.as_ref().unwrap().parts[0];
        assert_eq!(part.text.as_deref(), Some("Hel"));
        assert_eq!(chunk.usage_metadata.unwrap().prompt_token_count, Some(12));
    }

    #[test]
    fn chunk_tolerates_missing_parts() {
        let raw = r#"{"candidates": [{"content": {"role": "model"}, "finishReason": "STOP"}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let candidate = &chunk.candidates.unwrap()[0];
        assert!(candidate.content.as_ref().unwrap().parts.is_empty());
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn request_uses_camel_case() {
        let req = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text("hi")],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: 8192,
                temperature: 0.0,
                top_p: 0.95,
            },
            safety_settings: SafetySetting::permissive(),
            system_instruction: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(json["generationConfig"]["topP"], 0.95);
        assert_eq!(json["safetySettings"][3]["category"], "HARM_CATEGORY_HARASSMENT");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert!(json["contents"][0]["parts"][0].get("thought").is_none());
        assert!(json.get("systemInstruction").is_none());
    }
}
