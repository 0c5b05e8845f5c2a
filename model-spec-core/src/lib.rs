//! Shared model/provider spec types and parsers for Loom.
//!
//! `config`'s `models` root (spec §6 "Config schema") stores one of these
//! per configured model; this crate is the one place that knows the shape
//! so `config` and `loom` don't each invent their own.

use serde::{Deserialize, Serialize};

/// A single provider entry under `models.<id>.provider`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    Local,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            "google" | "gemini" => Some(Provider::Google),
            "local" | "ollama" => Some(Provider::Local),
            _ => None,
        }
    }
}

/// One entry of the `models` config root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub supports_tools: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("unknown provider {0:?}")]
    UnknownProvider(String),
}

/// Parses one `models.<id>` JSON object into a [`ModelSpec`]. Tolerant of
/// unknown extra keys; rejects only a missing/unrecognized provider.
pub fn parse_model_spec(id: &str, value: &serde_json::Value) -> Result<ModelSpec, ParseError> {
    let provider_raw = value
        .get("provider")
        .and_then(|v| v.as_str())
        .ok_or(ParseError::MissingField("provider"))?;
    let provider = Provider::parse(provider_raw).ok_or_else(|| ParseError::UnknownProvider(provider_raw.to_string()))?;
    Ok(ModelSpec {
        id: id.to_string(),
        provider,
        context_window: value.get("contextWindow").and_then(|v| v.as_u64()).map(|n| n as u32),
        supports_tools: value.get("supportsTools").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_provider() {
        let v = serde_json::json!({"provider": "anthropic", "contextWindow": 200000});
        let spec = parse_model_spec("opus", &v).unwrap();
        assert_eq!(spec.provider, Provider::Anthropic);
        assert_eq!(spec.context_window, Some(200000));
    }

    #[test]
    fn rejects_unknown_provider() {
        let v = serde_json::json!({"provider": "nonexistent"});
        assert!(matches!(parse_model_spec("x", &v), Err(ParseError::UnknownProvider(_))));
    }

    #[test]
    fn rejects_missing_provider() {
        let v = serde_json::json!({});
        assert!(matches!(parse_model_spec("x", &v), Err(ParseError::MissingField("provider"))));
    }
}
