use std::sync::Arc;

use tracing::{info, instrument};

use scribe_core::provider::LlmProvider;

use crate::error::EngineError;
use crate::prompts::PromptTemplates;
use crate::session::{NoopObserver, Session, SessionConfig};

/// Extensions that are never treated as source code, whatever the model says.
const REMOVED_EXTENSIONS: &[&str] = &["md"];

/// Ask the model which of `found` are source-code extensions.
///
/// Runs on a fresh conversation so that nothing leaks into the caller's session.
#[instrument(skip_all, fields(found = found.len()))]
pub async fn classify<S: AsRef<str>>(
    provider: Arc<dyn LlmProvider>,
    config: SessionConfig,
    templates: &PromptTemplates,
    found: &[S],
) -> Result<Vec<String>, EngineError> {
    let mut session = Session::new(provider, config);
    let answer = session
        .send(&templates.classify(found), &NoopObserver)
        .await?;

    let extensions = parse_extensions(&answer);
    if extensions.is_empty() {
        return Err(EngineError::Classification(format!(
            "no extensions in model answer {answer:?}"
        )));
    }
    info!(extensions = %extensions.join(","), "code extensions classified");
    Ok(extensions)
}

/// Split a comma-separated answer into normalized, de-duplicated extensions.
pub fn parse_extensions(answer: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in answer.split(',') {
        let ext = raw.trim().to_lowercase();
        let ext = ext.strip_prefix('.').unwrap_or(&ext).trim();
        if ext.is_empty() || REMOVED_EXTENSIONS.contains(&ext) {
            continue;
        }
        if !out.iter().any(|e| e == ext) {
            out.push(ext.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::errors::GatewayError;
    use scribe_llm::{MockProvider, MockResponse};

    #[test]
    fn parse_normalizes_entries() {
        assert_eq!(parse_extensions(" .PY, ts ,,ts,\n"), vec!["py", "ts"]);
    }

    #[test]
    fn parse_removes_md() {
        assert_eq!(parse_extensions("md,rs,.md"), vec!["rs"]);
    }

    #[tokio::test]
    async fn classify_drops_md_from_answer() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::stream_text("py,md")]));
        let result = classify(
            mock.clone(),
            SessionConfig::default(),
            &PromptTemplates::default(),
            &["py", "md", "png"],
        )
        .await
        .unwrap();

        assert_eq!(result, vec!["py"]);
        let contexts = mock.contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].messages.len(), 1);
        assert!(contexts[0].last_user_text().unwrap().ends_with("py,md,png"));
    }

    #[tokio::test]
    async fn classify_with_no_found_extensions_still_asks() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::stream_text(".c")]));
        let result = classify::<&str>(
            mock.clone(),
            SessionConfig::default(),
            &PromptTemplates::default(),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(result, vec!["c"]);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn only_md_is_a_classification_error() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::stream_text("md")]));
        let err = classify(
            mock,
            SessionConfig::default(),
            &PromptTemplates::default(),
            &["md"],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Classification(_)));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::AuthenticationFailed("expired".into()),
        )]));
        let err = classify(
            mock,
            SessionConfig::default(),
            &PromptTemplates::default(),
            &["rs"],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Gateway(GatewayError::AuthenticationFailed(_))
        ));
    }
}
