//! Agent Runner (spec §4 component G): invokes the external agent engine,
//! streams assistant/tool events, returns the final payload list + usage
//! meta. `loom` is the one place the spec's "opaque agent engine" is given
//! a concrete, runnable body — everything above this module only sees
//! [`AgentEngine`], never `loom`'s internal `RunOptions`/`RunError` types.

use async_trait::async_trait;

use crate::error::GatewayError;

/// One assistant/tool stream event surfaced to the protocol server's
/// `agent` event channel (spec §4.4 "Events").
#[derive(Clone, Debug, serde::Serialize)]
pub struct AgentStreamEvent {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Input to one agent invocation.
#[derive(Clone, Debug)]
pub struct AgentInput {
    pub message: String,
    pub thread_id: Option<String>,
    pub verbose: bool,
}

/// Final payload + usage metadata returned by a Run (spec §3 "Run", §4.5
/// "Output selection" consumes `payloads`).
#[derive(Clone, Debug, Default)]
pub struct AgentOutput {
    pub payloads: Vec<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub model: Option<String>,
    /// `MEDIA:<path-or-url>` refs stripped out of `payloads` by
    /// [`extract_media_hints`] before Component H ever sees the text.
    pub media: Vec<String>,
}

impl AgentOutput {
    /// Heartbeat "Output selection" (spec §4.5): the last non-empty payload.
    pub fn last_non_empty(&self) -> Option<&str> {
        self.payloads.iter().rev().map(String::as_str).find(|p| !p.trim().is_empty())
    }
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<AgentStreamEvent>;

/// The opaque agent engine interface the scheduler consumes (spec §1,
/// §4 component G). Implementations stream events to `on_event` as they
/// occur and return the final output once the run reaches a terminal
/// state.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    async fn run(&self, input: AgentInput, on_event: EventSink) -> Result<AgentOutput, GatewayError>;
}

/// Default `AgentEngine` over loom's ReAct runner.
pub struct LoomAgentEngine {
    working_folder: Option<std::path::PathBuf>,
}

impl LoomAgentEngine {
    pub fn new(working_folder: Option<std::path::PathBuf>) -> Self {
        Self { working_folder }
    }
}

#[async_trait]
impl AgentEngine for LoomAgentEngine {
    async fn run(&self, input: AgentInput, on_event: EventSink) -> Result<AgentOutput, GatewayError> {
        let opts = loom::RunOptions {
            message: input.message,
            working_folder: self.working_folder.clone(),
            thread_id: input.thread_id,
            role_file: None,
            verbose: input.verbose,
            got_adaptive: false,
            display_max_len: 4000,
            output_json: false,
        };

        let sink = on_event.clone();
        let on_event_cb: Box<dyn FnMut(loom::AnyStreamEvent) + Send> = Box::new(move |ev| {
            let _ = sink.send(AgentStreamEvent {
                kind: "agent".to_string(),
                payload: serde_json::json!({ "debug": format!("{ev:?}") }),
            });
        });

        let reply = loom::run_agent(&opts, &loom::RunCmd::React, Some(on_event_cb))
            .await
            .map_err(GatewayError::from)?;

        let (text, media) = extract_media_hints(&reply);

        Ok(AgentOutput {
            payloads: vec![text],
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            model: None,
            media,
        })
    }
}

/// Extracts `MEDIA:<path-or-url>` hint lines from agent output (spec §6
/// "Outbound MEDIA hint") and returns `(remaining_text, media_refs)`.
pub fn extract_media_hints(text: &str) -> (String, Vec<String>) {
    let mut media = Vec::new();
    let mut lines = Vec::new();
    for line in text.lines() {
        match line.strip_prefix("MEDIA:") {
            Some(rest) if !rest.contains(char::is_whitespace) && !rest.is_empty() => {
                media.push(rest.to_string());
            }
            _ => lines.push(line),
        }
    }
    (lines.join("\n"), media)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_media_hint_lines() {
        let (text, media) = extract_media_hints("hello\nMEDIA:/tmp/a.png\nworld");
        assert_eq!(text, "hello\n\nworld");
        assert_eq!(media, vec!["/tmp/a.png".to_string()]);
    }

    #[test]
    fn ignores_media_hints_with_whitespace() {
        let (text, media) = extract_media_hints("MEDIA: not a path");
        assert_eq!(text, "MEDIA: not a path");
        assert!(media.is_empty());
    }

    #[test]
    fn last_non_empty_skips_blank_trailing_payload() {
        let out = AgentOutput {
            payloads: vec!["first".into(), "   ".into()],
            ..Default::default()
        };
        assert_eq!(out.last_non_empty(), Some("first"));
    }
}
