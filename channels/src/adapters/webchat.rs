//! WebChat: the in-house web/TUI chat surface. No external transport —
//! delivery is simply a publish onto a broadcast channel that the gateway
//! protocol server (`serve`) subscribes to per connection.

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::traits::{
    AccountContext, AccountStatus, Capabilities, DeliveryMode, DmPolicy, Meta, ResolvedTarget,
};
use crate::{
    traits::{default_chunk, AdapterKind},
    ChannelAdapter, ChannelError, ConfigSurface, GatewaySurface, OutboundSurface, ReloadSurface,
    SecuritySurface, StatusSurface,
};

const CHUNK_CAP: usize = 4000;

/// Outbound delivery to a webchat connection: `(to, text)`.
#[derive(Clone, Debug)]
pub struct WebChatDelivery {
    pub to: String,
    pub text: String,
}

pub struct WebChatAdapter {
    outbound: broadcast::Sender<WebChatDelivery>,
}

impl Default for WebChatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WebChatAdapter {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { outbound: tx }
    }

    /// Subscribed to by the protocol server's per-connection write loop.
    pub fn subscribe(&self) -> broadcast::Receiver<WebChatDelivery> {
        self.outbound.subscribe()
    }
}

#[async_trait]
impl ConfigSurface for WebChatAdapter {
    fn is_configured(&self, _account_id: &str) -> bool {
        true
    }
    fn is_enabled(&self, _account_id: &str) -> bool {
        true
    }
    fn resolve_allow_from(&self, _account_id: &str) -> Vec<String> {
        vec!["*".to_string()]
    }
}

#[async_trait]
impl OutboundSurface for WebChatAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, CHUNK_CAP)
    }

    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        Ok(ResolvedTarget {
            to: envelope.from.clone(),
            reason: None,
        })
    }

    async fn send_text(&self, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError> {
        let _ = self.outbound.send(WebChatDelivery {
            to: target.to.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(&self, target: &ResolvedTarget, url_or_path: &str, caption: Option<&str>) -> Result<(), ChannelError> {
        let text = match caption {
            Some(c) => format!("{c}\nMEDIA:{url_or_path}"),
            None => format!("MEDIA:{url_or_path}"),
        };
        self.send_text(target, &text).await
    }
}

#[async_trait]
impl StatusSurface for WebChatAdapter {
    fn default_state(&self) -> AccountStatus {
        AccountStatus::Running
    }
    async fn probe(&self, _account_id: &str) -> AccountStatus {
        AccountStatus::Running
    }
    fn audit(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
    fn build_account_snapshot(&self, account_id: &str) -> Value {
        json!({ "id": account_id, "status": "running" })
    }
    fn build_channel_summary(&self) -> Value {
        json!({ "channel": "webchat" })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

#[async_trait]
impl GatewaySurface for WebChatAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl SecuritySurface for WebChatAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        DmPolicy::Open
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

impl ReloadSurface for WebChatAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.webchat"]
    }
}

#[async_trait]
impl ChannelAdapter for WebChatAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::WebChat
    }

    fn meta(&self) -> Meta {
        Meta {
            id: "webchat",
            label: "Web Chat",
            order: 100,
            force_account_binding: false,
            prefer_session_lookup_for_announce_target: false,
            quickstart_allow_from: false,
            show_configured: true,
        }
    }

    fn capabilities(&self) -> Capabilities {
        const CHAT_TYPES: &[ChatType] = &[ChatType::Direct];
        Capabilities {
            chat_types: CHAT_TYPES,
            media: true,
            polls: false,
            native_commands: false,
            block_streaming_default: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_text_publishes_to_subscribers() {
        let adapter = WebChatAdapter::new();
        let mut rx = adapter.subscribe();
        adapter
            .send_text(&ResolvedTarget { to: "conn-1".into(), reason: None }, "hi")
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.to, "conn-1");
        assert_eq!(delivery.text, "hi");
    }
}
