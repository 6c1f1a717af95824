use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use scribe_core::ids::AnalysisId;
use scribe_core::provider::LlmProvider;
use scribe_telemetry::{names, MetricsRecorder};

use crate::classifier;
use crate::cloner::RepoCloner;
use crate::error::EngineError;
use crate::extractor;
use crate::prompts::PromptTemplates;
use crate::session::{NoopObserver, Session, SessionConfig, TurnObserver};

/// Runs the clone → classify → extract → three-turn analysis pipeline.
///
/// Shared by every connection; all per-conversation state lives in the
/// [`Session`] passed to [`analyze`](Self::analyze).
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    cloner: Arc<dyn RepoCloner>,
    templates: PromptTemplates,
    session_config: SessionConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cloner: Arc<dyn RepoCloner>,
        templates: PromptTemplates,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            cloner,
            templates,
            session_config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// A fresh conversation sharing this orchestrator's provider and limits.
    pub fn new_session(&self) -> Session {
        Session::new(self.provider.clone(), self.session_config.clone())
            .with_metrics(self.metrics.clone())
    }

    /// Analyze the repository at `repo_url` inside `session` and return the description.
    ///
    /// The two ingestion turns are pinned in the session so later refinement
    /// prompts keep seeing the code. Only the final turn is forwarded to `observer`.
    #[instrument(skip_all, fields(analysis_id = %AnalysisId::new(), session_id = %session.id(), repo_url = %repo_url))]
    pub async fn analyze(
        &self,
        repo_url: &str,
        session: &mut Session,
        observer: &dyn TurnObserver,
    ) -> Result<String, EngineError> {
        let started = Instant::now();
        let result = self.run(repo_url, session, observer).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(description) => {
                info!(elapsed_ms, chars = description.len(), "analysis complete");
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), elapsed_ms, "analysis failed");
            }
        }
        if let Some(m) = &self.metrics {
            m.counter_inc(names::ANALYSES_TOTAL, &[], 1);
            m.histogram_observe(names::ANALYSIS_DURATION_MS, &[], elapsed_ms);
            if let Err(e) = &result {
                m.counter_inc(names::ANALYSIS_FAILURES_TOTAL, &[("kind", e.kind())], 1);
            }
        }
        result
    }

    async fn run(
        &self,
        repo_url: &str,
        session: &mut Session,
        observer: &dyn TurnObserver,
    ) -> Result<String, EngineError> {
        // Removed on drop, whichever way this function returns.
        let workdir = tempfile::Builder::new().prefix("scribe-").tempdir()?;
        self.cloner.fetch_into(repo_url, workdir.path()).await?;

        let root: PathBuf = workdir.path().to_path_buf();
        let found = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || extractor::found_extensions(&root)).await?
        };
        let found: Vec<String> = found.into_iter().collect();

        let extensions = classifier::classify(
            self.provider.clone(),
            self.session_config.clone(),
            &self.templates,
            &found[..],
        )
        .await?;

        let corpus =
            tokio::task::spawn_blocking(move || extractor::extract(&root, &extensions)).await?;
        info!(files = corpus.len(), "corpus extracted");
        if let Some(m) = &self.metrics {
            m.histogram_observe(names::CORPUS_FILES, &[], corpus.len() as f64);
        }

        session
            .send_pinned(&self.templates.ingest_files(&corpus), &NoopObserver)
            .await?;
        session
            .send_pinned(&self.templates.ingest_paths(&corpus), &NoopObserver)
            .await?;
        let description = session.send(&self.templates.describe(), observer).await?;

        drop(workdir);
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use scribe_core::errors::GatewayError;
    use scribe_core::messages::Message;
    use scribe_llm::{MockProvider, MockResponse};

    /// Writes a fixed file tree instead of cloning, and remembers where.
    struct FixtureCloner {
        files: Vec<(&'static str, &'static str)>,
        dests: Mutex<Vec<PathBuf>>,
    }

    impl FixtureCloner {
        fn new(files: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                files,
                dests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RepoCloner for FixtureCloner {
        async fn fetch_into(&self, _url: &str, dest: &Path) -> Result<(), EngineError> {
            for (rel, content) in &self.files {
                let path = dest.join(rel);
                std::fs::create_dir_all(path.parent().unwrap())?;
                std::fs::write(path, content)?;
            }
            self.dests.lock().push(dest.to_path_buf());
            Ok(())
        }
    }

    struct FailingCloner;

    #[async_trait]
    impl RepoCloner for FailingCloner {
        async fn fetch_into(&self, _url: &str, _dest: &Path) -> Result<(), EngineError> {
            Err(EngineError::Clone("Repository not found".into()))
        }
    }

    fn orchestrator(mock: &Arc<MockProvider>, cloner: Arc<dyn RepoCloner>) -> Orchestrator {
        Orchestrator::new(
            mock.clone(),
            cloner,
            PromptTemplates::default(),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn analyze_runs_classify_then_three_turns() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("py,md"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_text("Partie 1 / Partie 2"),
        ]));
        let cloner = FixtureCloner::new(vec![
            ("app/main.py", "print('hi')"),
            ("README.md", "# hi"),
            ("logo.png", "png"),
        ]);
        let orch = orchestrator(&mock, cloner.clone());
        let mut session = orch.new_session();

        let description = orch
            .analyze("https://example.com/repo.git", &mut session, &NoopObserver)
            .await
            .unwrap();
        assert_eq!(description, "Partie 1 / Partie 2");

        let contexts = mock.contexts();
        assert_eq!(contexts.len(), 4);
        // Classifier on its own conversation
        assert_eq!(contexts[0].messages.len(), 1);
        assert!(contexts[0].last_user_text().unwrap().ends_with("md,png,py"));
        // Ingestion carries only the classified files
        let ingest = contexts[1].last_user_text().unwrap();
        assert!(ingest.contains("app/main.py : \nprint('hi')\n"));
        assert!(!ingest.contains("README.md"));
        assert_eq!(contexts[2].messages.len(), 3);
        assert_eq!(contexts[3].messages.len(), 5);
        assert!(contexts[3].last_user_text().unwrap().ends_with("Write your answer in french."));

        assert_eq!(session.turn_count(), 3);
        // Working directory is gone
        assert!(!cloner.dests.lock()[0].exists());
    }

    #[tokio::test]
    async fn empty_repository_still_produces_a_description() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text(".c"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_text("Rien"),
        ]));
        let orch = orchestrator(&mock, FixtureCloner::new(vec![]));
        let mut session = orch.new_session();

        let description = orch
            .analyze("https://example.com/empty.git", &mut session, &NoopObserver)
            .await
            .unwrap();
        assert_eq!(description, "Rien");

        let contexts = mock.contexts();
        assert!(contexts[0].last_user_text().unwrap().ends_with("Here is the input :\n"));
        assert!(contexts[1].last_user_text().unwrap().ends_with("Code files :\n"));
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn observer_only_sees_final_turn() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("rs"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_chunks(&["desc", "ription"]),
        ]));
        let orch = orchestrator(&mock, FixtureCloner::new(vec![("lib.rs", "")]));
        let mut session = orch.new_session();
        let seen = Mutex::new(String::new());
        let observer = |d: &str| seen.lock().push_str(d);

        orch.analyze("u", &mut session, &observer).await.unwrap();
        assert_eq!(*seen.lock(), "description");
    }

    #[tokio::test]
    async fn ingestion_turns_survive_later_refinements() {
        let mock = Arc::new(
            MockProvider::new(vec![MockResponse::stream_text("rs")]).then_respond(|_| "OK".into()),
        );
        let orch = orchestrator(&mock, FixtureCloner::new(vec![("lib.rs", "fn x() {}")]));
        let mut session = orch.new_session();

        orch.analyze("u", &mut session, &NoopObserver).await.unwrap();
        session
            .send(&orch.templates().refine("plus court"), &NoopObserver)
            .await
            .unwrap();

        let last = mock.contexts().pop().unwrap();
        assert_eq!(last.messages.len(), 7);
        assert!(last.messages[0].text.contains("fn x() {}"));
        assert_eq!(
            last.messages[6],
            Message::user("plus court\n\nRenvoie le README complet avec les modifications.")
        );
    }

    #[tokio::test]
    async fn clone_failure_is_reported_and_recorded() {
        let metrics = Arc::new(MetricsRecorder::new());
        let mock = Arc::new(MockProvider::new(vec![]));
        let orch = orchestrator(&mock, Arc::new(FailingCloner)).with_metrics(Some(metrics.clone()));
        let mut session = orch.new_session();

        let err = orch
            .analyze("https://example.com/missing.git", &mut session, &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Clone(_)));
        assert_eq!(mock.call_count(), 0);
        assert_eq!(session.turn_count(), 0);
        assert_eq!(metrics.counter_get(names::ANALYSES_TOTAL, &[]), 1);
        assert_eq!(
            metrics.counter_get(names::ANALYSIS_FAILURES_TOTAL, &[("kind", "clone")]),
            1
        );
    }

    #[tokio::test]
    async fn turn_failure_mid_analysis_propagates() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("rs"),
            MockResponse::stream_text("OK"),
            MockResponse::stream_error(GatewayError::Blocked("SAFETY".into())),
        ]));
        let orch = orchestrator(&mock, FixtureCloner::new(vec![("lib.rs", "")]));
        let mut session = orch.new_session();

        let err = orch.analyze("u", &mut session, &NoopObserver).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::Blocked(_))));
        assert_eq!(session.turn_count(), 1);
    }
}
