use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::error::EngineError;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetches a repository into a local directory.
#[async_trait]
pub trait RepoCloner: Send + Sync {
    /// Populate `dest` (which exists and is empty) with the repository at `url`.
    async fn fetch_into(&self, url: &str, dest: &Path) -> Result<(), EngineError>;
}

/// Shallow clone with the `git` CLI.
pub struct GitCloner {
    timeout: Duration,
}

impl GitCloner {
    pub fn new() -> Self {
        Self {
            timeout: CLONE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for GitCloner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoCloner for GitCloner {
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn fetch_into(&self, url: &str, dest: &Path) -> Result<(), EngineError> {
        let output = timeout(
            self.timeout,
            tokio::process::Command::new("git")
                .args(["clone", "--depth", "1", "--", url])
                .arg(dest)
                .env("GIT_TERMINAL_PROMPT", "0")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| EngineError::Clone(format!("timed out after {}s", self.timeout.as_secs())))?
        .map_err(|e| EngineError::Clone(format!("failed to execute git clone: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Clone(stderr.trim().to_string()));
        }

        info!("repository cloned");
        Ok(())
    }
}
