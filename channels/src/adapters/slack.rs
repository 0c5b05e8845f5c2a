//! Slack adapter. Sends via `chat.postMessage` over the Web API
//! (`reqwest`, rustls-tls) — no Socket Mode/Events API session, matching
//! Discord's REST-only scope in this build.

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use reqwest::Client;
use serde_json::{json, Value};

use crate::traits::{
    AccountContext, AccountStatus, Capabilities, DeliveryMode, DmPolicy, Meta, ResolvedTarget,
};
use crate::{
    traits::{default_chunk, AdapterKind},
    ChannelAdapter, ChannelError, ConfigSurface, GatewaySurface, OutboundSurface, ReloadSurface,
    SecuritySurface, StatusSurface,
};

const SLACK_CHUNK_CAP: usize = 4000;
const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

pub struct SlackAdapter {
    bot_token: Option<String>,
    client: Client,
}

impl SlackAdapter {
    pub fn new(bot_token: Option<String>) -> Self {
        Self {
            bot_token,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ConfigSurface for SlackAdapter {
    fn is_configured(&self, _account_id: &str) -> bool {
        self.bot_token.is_some()
    }
    fn is_enabled(&self, account_id: &str) -> bool {
        self.is_configured(account_id)
    }
    fn resolve_allow_from(&self, _account_id: &str) -> Vec<String> {
        vec!["*".to_string()]
    }
}

#[async_trait]
impl OutboundSurface for SlackAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, SLACK_CHUNK_CAP)
    }

    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        Ok(ResolvedTarget { to: envelope.from.clone(), reason: None })
    }

    async fn send_text(&self, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError> {
        let token = self.bot_token.as_ref().ok_or_else(|| ChannelError::NotLinked(target.to.clone()))?;
        let resp = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(token)
            .json(&json!({ "channel": target.to, "text": text }))
            .send()
            .await
            .map_err(|e| ChannelError::TransientNetwork(e.to_string()))?;
        let body: Value = resp.json().await.map_err(|e| ChannelError::TransientNetwork(e.to_string()))?;
        match body.get("ok").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => {
                let err = body.get("error").and_then(Value::as_str).unwrap_or("unknown");
                if err == "ratelimited" {
                    Err(ChannelError::RateLimit(err.to_string()))
                } else {
                    Err(ChannelError::ChatNotFound(target.to.clone()))
                }
            }
        }
    }

    async fn send_media(&self, target: &ResolvedTarget, url_or_path: &str, caption: Option<&str>) -> Result<(), ChannelError> {
        let text = match caption {
            Some(c) => format!("{c}\n{url_or_path}"),
            None => url_or_path.to_string(),
        };
        self.send_text(target, &text).await
    }
}

#[async_trait]
impl StatusSurface for SlackAdapter {
    fn default_state(&self) -> AccountStatus {
        if self.bot_token.is_some() {
            AccountStatus::Stopped
        } else {
            AccountStatus::NotLinked
        }
    }
    async fn probe(&self, _account_id: &str) -> AccountStatus {
        if self.bot_token.is_some() {
            AccountStatus::Running
        } else {
            AccountStatus::NotLinked
        }
    }
    fn audit(&self, _account_id: &str) -> Vec<String> {
        if self.bot_token.is_none() {
            vec!["no bot token configured".to_string()]
        } else {
            vec![]
        }
    }
    fn build_account_snapshot(&self, account_id: &str) -> Value {
        json!({ "id": account_id, "configured": self.bot_token.is_some() })
    }
    fn build_channel_summary(&self) -> Value {
        json!({ "channel": "slack" })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, account_id: &str) -> Vec<String> {
        self.audit(account_id)
    }
}

#[async_trait]
impl GatewaySurface for SlackAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        if self.bot_token.is_none() {
            return Err(ChannelError::NotLinked("slack".to_string()));
        }
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl SecuritySurface for SlackAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        DmPolicy::Open
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

impl ReloadSurface for SlackAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.slack"]
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Slack
    }

    fn meta(&self) -> Meta {
        Meta {
            id: "slack",
            label: "Slack",
            order: 5,
            force_account_binding: false,
            prefer_session_lookup_for_announce_target: false,
            quickstart_allow_from: false,
            show_configured: true,
        }
    }

    fn capabilities(&self) -> Capabilities {
        const CHAT_TYPES: &[ChatType] = &[ChatType::Direct, ChatType::Channel];
        Capabilities {
            chat_types: CHAT_TYPES,
            media: true,
            polls: false,
            native_commands: true,
            block_streaming_default: false,
        }
    }
}
