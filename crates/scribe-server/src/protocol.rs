//! JSON frames exchanged over `/ws`.

use serde::Serialize;
use serde_json::Value;

/// A validated client request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Analyze { repo_url: String },
    Prompt { message: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::Prompt { .. } => "prompt",
        }
    }
}

/// Why an inbound frame was rejected. `Display` is the text sent back to the client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Missing '{field}' in {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },
    #[error("Unknown action '{0}'")]
    UnknownAction(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// A frame pushed to the client; serializes as a single-key object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outbound {
    Message(String),
    Readme(String),
    Response(String),
    Error(String),
    Delta(String),
}

impl Outbound {
    pub fn analysis_started() -> Self {
        Self::Message("Analysis started...".into())
    }

    pub fn to_json(&self) -> String {
        // Serializing a string-only enum cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<ProtocolError> for Outbound {
    fn from(e: ProtocolError) -> Self {
        Self::Error(e.to_string())
    }
}

/// Parse and validate one inbound text frame.
pub fn parse_action(raw: &str) -> Result<Action, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(ProtocolError::InvalidJson("expected a JSON object".into()));
    };

    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or(ProtocolError::MissingField {
            field: "action",
            context: "message",
        })?;

    let non_empty = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    match action {
        "analyze" => non_empty("repoUrl")
            .map(|repo_url| Action::Analyze { repo_url })
            .ok_or(ProtocolError::MissingField {
                field: "repoUrl",
                context: "message",
            }),
        "prompt" => non_empty("message")
            .map(|message| Action::Prompt { message })
            .ok_or(ProtocolError::MissingField {
                field: "message",
                context: "prompt",
            }),
        other => Err(ProtocolError::UnknownAction(other.to_string())),
    }
}
