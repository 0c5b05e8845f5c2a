//! iMessage adapter. Concrete transport and the macOS TCC/permission flows
//! are explicitly out of scope (spec §1); this models the same closed
//! surface as `whatsapp.rs`/`signal.rs` without importing either.

use std::sync::Mutex;

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use serde_json::{json, Value};

use crate::adapters::TransportHandle;
use crate::traits::{
    AccountContext, AccountStatus, Capabilities, DeliveryMode, DmPolicy, Meta, ResolvedTarget,
};
use crate::{
    traits::{default_chunk, AdapterKind},
    ChannelAdapter, ChannelError, ConfigSurface, GatewaySurface, OutboundSurface, ReloadSurface,
    SecuritySurface, StatusSurface,
};

const CHUNK_CAP: usize = 4096;

pub struct IMessageAdapter {
    allow_from: Vec<String>,
    transport: Mutex<TransportHandle>,
}

impl IMessageAdapter {
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
impl ConfigSurface for IMessageAdapter {
    fn is_configured(&self, _account_id: &str) -> bool {
        !self.allow_from.is_empty()
    }
    fn is_enabled(&self, account_id: &str) -> bool {
        self.is_configured(account_id)
    }
    fn resolve_allow_from(&self, _account_id: &str) -> Vec<String> {
        self.allow_from.clone()
    }
}

#[async_trait]
impl OutboundSurface for IMessageAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }
    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, CHUNK_CAP)
    }
    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        if self.allow_from.iter().any(|a| a == "*" || a == &envelope.from) {
            Ok(ResolvedTarget { to: envelope.from.clone(), reason: None })
        } else {
            Err(ChannelError::ChatNotFound(envelope.from.clone()))
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
impl StatusSurface for IMessageAdapter {
    fn default_state(&self) -> AccountStatus {
        AccountStatus::NotLinked
    }
    async fn probe(&self, _account_id: &str) -> AccountStatus {
        if self.is_linked() { AccountStatus::Running } else { AccountStatus::NotLinked }
    }
    fn audit(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
    fn build_account_snapshot(&self, account_id: &str) -> Value {
        json!({ "id": account_id, "linked": self.is_linked() })
    }
    fn build_channel_summary(&self) -> Value {
        json!({ "channel": "imessage", "linked": self.is_linked() })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

#[async_trait]
impl GatewaySurface for IMessageAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        *self.transport.lock().unwrap() = TransportHandle::NotLinked;
        Ok(())
    }
}

impl SecuritySurface for IMessageAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        DmPolicy::Allowlist
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec!["macOS TCC permission flows are not managed by this build".to_string()]
    }
}

impl ReloadSurface for IMessageAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.imessage"]
    }
}

#[async_trait]
impl ChannelAdapter for IMessageAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::IMessage
    }
    fn meta(&self) -> Meta {
        Meta {
            id: "imessage",
            label: "iMessage",
            order: 4,
            force_account_binding: true,
            prefer_session_lookup_for_announce_target: false,
            quickstart_allow_from: true,
            show_configured: true,
        }
    }
    fn capabilities(&self) -> Capabilities {
        const CHAT_TYPES: &[ChatType] = &[ChatType::Direct, ChatType::Group];
        Capabilities {
            chat_types: CHAT_TYPES,
            media: true,
            polls: false,
            native_commands: false,
            block_streaming_default: true,
        }
    }
}
