use scribe_core::errors::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("clone failed: {0}")]
    Clone(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Short label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.error_kind(),
            Self::Clone(_) => "clone",
            Self::Io(_) => "io",
            Self::Classification(_) => "classification",
            Self::Join(_) => "join",
        }
    }
}
