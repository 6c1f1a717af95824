use scribe_core::context::LlmContext;
use scribe_core::provider::GenerationOptions;

use crate::types::{Content, GenerateContentRequest, GenerationConfig, Part};

/// Build the Gemini request body for a full conversation.
pub fn build_request_body(context: &LlmContext, options: &GenerationOptions) -> GenerateContentRequest {
    let contents = context
        .messages
        .iter()
        .map(|m| Content {
            role: Some(m.role.as_str().to_string()),
            parts: vec![Part::text(m.text.clone())],
        })
        .collect();

    let system_instruction = context.system_instruction.as_ref().map(|text| Content {
        role: None,
        parts: vec![Part::text(text.clone())],
    });

    GenerateContentRequest {
        contents,
        generation_config: GenerationConfig {
            max_output_tokens: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
        },
        safety_settings: options.safety.clone(),
        system_instruction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::messages::Message;

    #[test]
    fn converts_roles_in_order() {
        let ctx = LlmContext {
            messages: vec![
                Message::user("files"),
                Message::model("OK"),
                Message::user("describe"),
            ],
            system_instruction: None,
        };
        let body = build_request_body(&ctx, &GenerationOptions::default());
        let json = serde_json::to_value(&body).unwrap();
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "OK");
        assert_eq!(contents[2]["parts"][0]["text"], "describe");
    }

    #[test]
    fn carries_generation_options() {
        let opts = GenerationOptions {
            max_output_tokens: 100,
            temperature: 0.5,
            ..Default::default()
        };
        let body = build_request_body(&LlmContext::single("x"), &opts);
        assert_eq!(body.generation_config.max_output_tokens, 100);
        assert!((body.generation_config.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(body.safety_settings.len(), 4);
    }

    #[test]
    fn system_instruction_has_no_role() {
        let ctx = LlmContext {
            messages: vec![Message::user("hi")],
            system_instruction: Some("be brief".into()),
        };
        let json = serde_json::to_value(build_request_body(&ctx, &GenerationOptions::default())).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
    }
}
