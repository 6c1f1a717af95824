//! Service configuration with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ScribeConfig::default()`]
//! 2. If a config file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides
//!
//! CLI flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use scribe_core::provider::GenerationOptions;
use scribe_engine::{PromptTemplates, SessionConfig};
use scribe_telemetry::{parse_level, LogFormat, TelemetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub prompts: PromptTemplates,
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Push `{"delta": ...}` frames while the model is answering.
    pub stream_deltas: bool,
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_send_queue: 256,
            stream_deltas: false,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Mock,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: ProviderKind,
    /// GCP project; with `location`, selects Vertex AI.
    pub project: Option<String>,
    pub location: Option<String>,
    pub model: String,
    pub api_base: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub turn_timeout_secs: u64,
    pub context_budget_tokens: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let options = GenerationOptions::default();
        let session = SessionConfig::default();
        Self {
            provider: ProviderKind::Gemini,
            project: None,
            location: None,
            model: scribe_llm::provider::DEFAULT_MODEL.into(),
            api_base: None,
            max_output_tokens: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            turn_timeout_secs: session.turn_timeout.as_secs(),
            context_budget_tokens: session.context_budget,
        }
    }
}

impl ModelSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            options: GenerationOptions {
                max_output_tokens: self.max_output_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
                ..Default::default()
            },
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
            context_budget: self.context_budget_tokens,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
        }
    }
}

impl ScribeConfig {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_send_queue == 0 {
            return Err(ConfigError::InvalidValue("server.max_send_queue must be > 0".into()));
        }
        if self.server.cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "server.cleanup_interval_secs must be > 0".into(),
            ));
        }
        if self.model.turn_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("model.turn_timeout_secs must be > 0".into()));
        }
        if parse_level(&self.telemetry.level).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "telemetry.level {:?} is not a log level",
                self.telemetry.level
            )));
        }
        Ok(())
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: parse_level(&self.telemetry.level).unwrap_or(tracing::Level::INFO),
            format: self.telemetry.format,
            ..Default::default()
        }
    }
}

/// Load configuration from `path` (if any) with environment overrides.
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<ScribeConfig, ConfigError> {
    let defaults = serde_json::to_value(ScribeConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ScribeConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Empty or unparsable values are ignored with a warning.
pub fn apply_env_overrides(config: &mut ScribeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    // PORT is the platform convention; SCRIBE_PORT wins when both are set.
    for name in ["PORT", "SCRIBE_PORT"] {
        if let Some(v) = read(name) {
            match parse_u16_range(&v, 1, u16::MAX) {
                Some(port) => config.server.port = port,
                None => warn!(key = name, value = %v, "invalid port env var, ignoring"),
            }
        }
    }
    if let Some(v) = read("SCRIBE_HOST") {
        config.server.host = v;
    }
    if let Some(v) = read("SCRIBE_MODEL") {
        config.model.model = v;
    }
    if let Some(v) = read("SCRIBE_PROJECT") {
        config.model.project = Some(v);
    }
    if let Some(v) = read("SCRIBE_LOCATION") {
        config.model.location = Some(v);
    }
    if let Some(v) = read("SCRIBE_LANGUAGE") {
        config.prompts.language = v;
    }
    if let Some(v) = read("SCRIBE_TURN_TIMEOUT") {
        match parse_u64_range(&v, 1, 86_400) {
            Some(secs) => config.model.turn_timeout_secs = secs,
            None => warn!(key = "SCRIBE_TURN_TIMEOUT", value = %v, "invalid timeout env var, ignoring"),
        }
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
