use std::time::Duration;

/// Typed error hierarchy for calls to the remote model.
/// Nothing in this workspace retries; the classification only drives logging and metrics.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {actual} > {limit}")]
    ContextWindowExceeded { limit: usize, actual: usize },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded { .. } => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Blocked(_) => "blocked",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 => Self::InvalidRequest(body),
            429 => Self::RateLimited,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable_labels() {
        assert_eq!(GatewayError::RateLimited.error_kind(), "rate_limited");
        assert_eq!(GatewayError::Blocked("SAFETY".into()).error_kind(), "blocked");
        assert_eq!(GatewayError::Timeout(Duration::from_secs(1)).error_kind(), "timeout");
        assert_eq!(
            GatewayError::ContextWindowExceeded { limit: 10, actual: 20 }.error_kind(),
            "context_window_exceeded"
        );
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            GatewayError::from_status(401, "unauthorized".into()),
            GatewayError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GatewayError::from_status(403, "forbidden".into()),
            GatewayError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GatewayError::from_status(404, "no such model".into()),
            GatewayError::InvalidRequest(_)
        ));
        assert!(matches!(GatewayError::from_status(429, String::new()), GatewayError::RateLimited));
        assert!(matches!(
            GatewayError::from_status(502, "bad gateway".into()),
            GatewayError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(302, "moved".into()),
            GatewayError::InvalidRequest(msg) if msg.contains("302")
        ));
    }

    #[test]
    fn display_is_human_readable() {
        let err = GatewayError::Timeout(Duration::from_secs(600));
        assert_eq!(err.to_string(), "timeout after 600s");
        assert_eq!(GatewayError::RateLimited.error_kind(), "rate_limited");
    }
}
