//! Heartbeat Scheduler (spec §4 component J, §4.5): a periodic self-prompt
//! that re-enters the scheduler (component F) with a synthesized envelope,
//! gated by readiness, routing, and a re-entrancy guard.

use std::sync::Arc;
use std::time::Duration;

use channels::{Registry, ResolvedTarget};
use envelope::{ChatType, Envelope};
use session::{SessionKey, SessionStore};

use crate::scheduler::Scheduler;

/// Suppresses delivery when the agent's stripped reply equals this sentinel
/// and carries no media (spec §4.5 "Output selection").
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// `heartbeat.target` (spec §4.5 "Target resolution").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatTarget {
    None,
    Last,
    Fixed(String),
}

#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    pub session_key: SessionKey,
    pub surface: String,
    pub account_id: String,
    pub target: HeartbeatTarget,
    pub prompt: String,
}

/// `every` parse (spec §4.5 "Interval parse"): default unit minutes; `0` or
/// an unparseable string disables the scheduler.
pub fn parse_interval(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    let (number, unit) = match spec.find(|c: char| c.is_alphabetic()) {
        Some(i) => (&spec[..i], &spec[i..]),
        None => (spec, "m"),
    };
    let value: f64 = number.trim().parse().ok()?;
    if value <= 0.0 {
        return None;
    }
    let seconds = match unit.trim().to_lowercase().as_str() {
        "" | "m" | "min" | "mins" | "minute" | "minutes" => value * 60.0,
        "s" | "sec" | "secs" | "second" | "seconds" => value,
        "h" | "hr" | "hrs" | "hour" | "hours" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Delivered,
    Suppressed,
    Skipped(&'static str),
}

pub struct HeartbeatScheduler {
    scheduler: Arc<Scheduler>,
    sessions: Arc<SessionStore>,
    registry: Arc<Registry>,
}

impl HeartbeatScheduler {
    pub fn new(scheduler: Arc<Scheduler>, sessions: Arc<SessionStore>, registry: Arc<Registry>) -> Self {
        Self { scheduler, sessions, registry }
    }

    /// Single coroutine every trigger path converges on (interval timer,
    /// `requestHeartbeatNow`, explicit RPC) — spec §4.5 "Trigger paths".
    pub async fn run_heartbeat_once(&self, cfg: &HeartbeatConfig) -> HeartbeatOutcome {
        let Some(adapter) = self.registry.get_by_surface(&cfg.surface, &cfg.account_id) else {
            return HeartbeatOutcome::Skipped("whatsapp-disabled");
        };

        let configured_to = match self.resolve_generic_target(cfg).await {
            Some(to) => to,
            None => return HeartbeatOutcome::Skipped("target-none"),
        };

        let target = match adapter.heartbeat() {
            Some(hb) => {
                if let Err(reason) = hb.is_ready(&cfg.account_id).await {
                    return HeartbeatOutcome::Skipped(reason);
                }
                match hb.resolve_heartbeat_target(&cfg.account_id, Some(&configured_to)) {
                    Some(t) => t,
                    None => return HeartbeatOutcome::Skipped("target-none"),
                }
            }
            None => ResolvedTarget { to: configured_to, reason: None },
        };

        let pre_run_entry = self.sessions.get(&cfg.session_key).await;
        let pre_run_updated_at = pre_run_entry.map(|e| e.updated_at);

        let envelope = synthesize_envelope(cfg, &target.to);
        let Some(result) = self.scheduler.run_now(cfg.session_key.clone(), envelope).await else {
            return HeartbeatOutcome::Skipped("requests-in-flight");
        };

        let output = match result {
            Ok(out) => out,
            Err(_) => return HeartbeatOutcome::Skipped("agent-error"),
        };

        // Restore updated_at so a heartbeat never artificially ranks a
        // session as recently active (spec §4.5 "Output selection").
        if let Some(prior) = pre_run_updated_at {
            let _ = self
                .sessions
                .update(&cfg.session_key, |entry| entry.updated_at = prior)
                .await;
        }

        let Some(reply) = output.last_non_empty() else {
            return HeartbeatOutcome::Suppressed;
        };
        if reply.trim() == HEARTBEAT_OK {
            return HeartbeatOutcome::Suppressed;
        }

        let media = output
            .media
            .iter()
            .map(|m| crate::delivery::MediaItem { url_or_path: m.clone(), caption: None })
            .collect();
        let job = crate::delivery::OutboundJob { payloads: vec![reply.to_string()], media };
        crate::delivery::deliver(adapter.as_ref(), &target, job).await;
        HeartbeatOutcome::Delivered
    }

    /// `none`/`last`/fixed resolution ahead of adapter-specific substitution
    /// (spec §4.5 "Target resolution"); WhatsApp's allowFrom-fallback is
    /// layered on top via `HeartbeatSurface::resolve_heartbeat_target`.
    async fn resolve_generic_target(&self, cfg: &HeartbeatConfig) -> Option<String> {
        match &cfg.target {
            HeartbeatTarget::None => None,
            HeartbeatTarget::Fixed(to) => Some(to.clone()),
            HeartbeatTarget::Last => {
                let entry = self.sessions.get(&cfg.session_key).await?;
                let channel = entry.last_channel?;
                if channel == "webchat" {
                    return None;
                }
                entry.last_to
            }
        }
    }
}

fn synthesize_envelope(cfg: &HeartbeatConfig, to: &str) -> Envelope {
    Envelope {
        raw_body: cfg.prompt.clone(),
        command_body: cfg.prompt.clone(),
        reply_to: None,
        surface: cfg.surface.clone(),
        from: "heartbeat".to_string(),
        to: to.to_string(),
        chat_type: ChatType::Direct,
        group_subject: None,
        group_members: None,
        room: None,
        space: None,
        sender_name: None,
        sender_identity: None,
        message_id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
        media: None,
        was_mentioned: false,
        thread_id: None,
        media_urls: vec![],
        reply_target_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_to_minutes() {
        assert_eq!(parse_interval("5"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn interval_zero_disables() {
        assert_eq!(parse_interval("0"), None);
    }

    #[test]
    fn interval_unparseable_disables() {
        assert_eq!(parse_interval("soon"), None);
    }

    #[test]
    fn interval_seconds_unit_is_honored() {
        assert_eq!(parse_interval("90s"), Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn last_target_never_resolves_to_webchat() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(dir.path().join("s.json")).await.unwrap());
        sessions.update("main", |e| e.set_last_channel("webchat")).await.unwrap();

        let registry = Arc::new(Registry::new());
        let (terminal_tx, _rx1) = tokio::sync::mpsc::unbounded_channel();
        let (stream_tx, _rx2) = tokio::sync::mpsc::unbounded_channel();

        struct NoopEngine;
        #[async_trait::async_trait]
        impl crate::agent::AgentEngine for NoopEngine {
            async fn run(
                &self,
                _input: crate::agent::AgentInput,
                _on_event: crate::agent::EventSink,
            ) -> Result<crate::agent::AgentOutput, crate::error::GatewayError> {
                Ok(crate::agent::AgentOutput::default())
            }
        }
        let scheduler = Arc::new(Scheduler::new(Arc::new(NoopEngine), sessions.clone(), terminal_tx, stream_tx));
        let hb = HeartbeatScheduler::new(scheduler, sessions, registry);

        let cfg = HeartbeatConfig {
            session_key: "main".to_string(),
            surface: "whatsapp".to_string(),
            account_id: "default".to_string(),
            target: HeartbeatTarget::Last,
            prompt: "poke".to_string(),
        };
        assert_eq!(hb.run_heartbeat_once(&cfg).await, HeartbeatOutcome::Skipped("target-none"));
    }
}
