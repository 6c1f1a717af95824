pub mod classifier;
pub mod cloner;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod prompts;
pub mod session;

pub use cloner::{GitCloner, RepoCloner};
pub use error::EngineError;
pub use extractor::Corpus;
pub use orchestrator::Orchestrator;
pub use prompts::PromptTemplates;
pub use session::{NoopObserver, Session, SessionConfig, TurnObserver};
