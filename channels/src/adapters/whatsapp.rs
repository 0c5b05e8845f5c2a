//! WhatsApp adapter. The concrete transport (Baileys-equivalent) is
//! explicitly out of scope (spec §1) — `start_account` models the lazy
//! import point (spec §9) but never wires a real socket; until a transport
//! is provided, sends return `not-linked` and heartbeat readiness reports
//! `whatsapp-not-linked`.

use std::sync::Mutex;

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use serde_json::{json, Value};

use crate::adapters::TransportHandle;
use crate::traits::{
    AccountContext, AccountStatus, Capabilities, DeliveryMode, DmPolicy, GroupPolicy, Meta,
    ResolvedTarget,
};
use crate::{
    traits::{default_chunk, AdapterKind},
    ChannelAdapter, ChannelError, ConfigSurface, GatewaySurface, HeartbeatSurface, OutboundSurface,
    ReloadSurface, SecuritySurface, StatusSurface,
};

const CHUNK_CAP: usize = 4096;

pub struct WhatsAppAdapter {
    allow_from: Vec<String>,
    transport: Mutex<TransportHandle>,
}

impl WhatsAppAdapter {
    pub fn new(allow_from: Vec<String>) -> Self {
        Self {
            allow_from,
            transport: Mutex::new(TransportHandle::NotLinked),
        }
    }

    fn is_linked(&self) -> bool {
        matches!(*self.transport.lock().unwrap(), TransportHandle::Active(_))
    }
}

#[async_trait]
impl ConfigSurface for WhatsAppAdapter {
    fn is_configured(&self, _account_id: &str) -> bool {
        !self.allow_from.is_empty()
    }
    fn is_enabled(&self, _account_id: &str) -> bool {
        self.is_configured(_account_id)
    }
    fn resolve_allow_from(&self, _account_id: &str) -> Vec<String> {
        self.allow_from.clone()
    }
}

#[async_trait]
impl OutboundSurface for WhatsAppAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, CHUNK_CAP)
    }

    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        if self.allow_from.iter().any(|a| a == "*") || self.allow_from.contains(&envelope.from) {
            return Ok(ResolvedTarget {
                to: envelope.from.clone(),
                reason: None,
            });
        }
        // allowFrom-fallback: substitute the first allowlisted number (spec §4.5).
        match self.allow_from.first() {
            Some(first) => Ok(ResolvedTarget {
                to: first.clone(),
                reason: Some("allowFrom-fallback"),
            }),
            None => Err(ChannelError::ChatNotFound(envelope.from.clone())),
        }
    }

    async fn send_text(&self, target: &ResolvedTarget, _text: &str) -> Result<(), ChannelError> {
        if !self.is_linked() {
            return Err(ChannelError::NotLinked(target.to.clone()));
        }
        Ok(())
    }

    async fn send_media(&self, target: &ResolvedTarget, _url_or_path: &str, _caption: Option<&str>) -> Result<(), ChannelError> {
        if !self.is_linked() {
            return Err(ChannelError::NotLinked(target.to.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusSurface for WhatsAppAdapter {
    fn default_state(&self) -> AccountStatus {
        AccountStatus::NotLinked
    }
    async fn probe(&self, _account_id: &str) -> AccountStatus {
        if self.is_linked() {
            AccountStatus::Running
        } else {
            AccountStatus::NotLinked
        }
    }
    fn audit(&self, _account_id: &str) -> Vec<String> {
        if self.allow_from.is_empty() {
            vec!["no allowFrom entries configured".to_string()]
        } else {
            vec![]
        }
    }
    fn build_account_snapshot(&self, account_id: &str) -> Value {
        json!({ "id": account_id, "linked": self.is_linked() })
    }
    fn build_channel_summary(&self) -> Value {
        json!({ "channel": "whatsapp", "linked": self.is_linked() })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, account_id: &str) -> Vec<String> {
        self.audit(account_id)
    }
}

#[async_trait]
impl GatewaySurface for WhatsAppAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        // Real transport wiring (Baileys-equivalent) is out of scope (spec §1);
        // this is the lazy-import point the spec's redesign calls for.
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        *self.transport.lock().unwrap() = TransportHandle::NotLinked;
        Ok(())
    }
}

impl SecuritySurface for WhatsAppAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        if self.allow_from.iter().any(|a| a == "*") {
            DmPolicy::Open
        } else {
            DmPolicy::Allowlist
        }
    }
    fn resolve_group_policy(&self, _account_id: &str) -> GroupPolicy {
        GroupPolicy::Allowlist
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

impl ReloadSurface for WhatsAppAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.whatsapp"]
    }
}

#[async_trait]
impl HeartbeatSurface for WhatsAppAdapter {
    async fn is_ready(&self, _account_id: &str) -> Result<(), &'static str> {
        if !self.is_configured(_account_id) {
            return Err("whatsapp-disabled");
        }
        if !self.is_linked() {
            return Err("whatsapp-not-linked");
        }
        Ok(())
    }

    fn resolve_heartbeat_target(&self, _account_id: &str, configured_to: Option<&str>) -> Option<ResolvedTarget> {
        let to = configured_to?;
        if self.allow_from.iter().any(|a| a == "*") || self.allow_from.iter().any(|a| a == to) {
            Some(ResolvedTarget { to: to.to_string(), reason: None })
        } else {
            self.allow_from.first().map(|first| ResolvedTarget {
                to: first.clone(),
                reason: Some("allowFrom-fallback"),
            })
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::WhatsApp
    }

    fn meta(&self) -> Meta {
        Meta {
            id: "whatsapp",
            label: "WhatsApp",
            order: 0,
            force_account_binding: true,
            prefer_session_lookup_for_announce_target: true,
            quickstart_allow_from: true,
            show_configured: true,
        }
    }

    fn capabilities(&self) -> Capabilities {
        const CHAT_TYPES: &[ChatType] = &[ChatType::Direct, ChatType::Group];
        Capabilities {
            chat_types: CHAT_TYPES,
            media: true,
            polls: true,
            native_commands: false,
            block_streaming_default: true,
        }
    }

    fn heartbeat(&self) -> Option<&dyn HeartbeatSurface> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allowlist_admits_any_sender() {
        let adapter = WhatsAppAdapter::new(vec!["*".to_string()]);
        let env = Envelope {
            raw_body: "hi".into(),
            command_body: "hi".into(),
            reply_to: None,
            surface: "whatsapp".into(),
            from: "+15555550999".into(),
            to: "main".into(),
            chat_type: ChatType::Direct,
            group_subject: None,
            group_members: None,
            room: None,
            space: None,
            sender_name: None,
            sender_identity: None,
            message_id: "m1".into(),
            timestamp: chrono::Utc::now(),
            media: None,
            was_mentioned: false,
            thread_id: None,
            media_urls: vec![],
            reply_target_id: None,
        };
        let target = adapter.resolve_target(&env, DeliveryMode::MediaCapable).unwrap();
        assert_eq!(target.to, "+15555550999");
    }

    #[tokio::test]
    async fn send_fails_until_linked() {
        let adapter = WhatsAppAdapter::new(vec!["*".to_string()]);
        let target = ResolvedTarget { to: "+1555".into(), reason: None };
        assert!(matches!(
            adapter.send_text(&target, "hi").await,
            Err(ChannelError::NotLinked(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_reports_not_linked() {
        let adapter = WhatsAppAdapter::new(vec!["*".to_string()]);
        assert_eq!(adapter.is_ready("default").await, Err("whatsapp-not-linked"));
    }
}
