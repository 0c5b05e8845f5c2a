//! Discord adapter. Sends via the REST API (`reqwest`, rustls-tls) rather
//! than a full gateway session — the bot only needs to post messages, and
//! a persistent gateway connection is out of scope for this build (full
//! event-driven Discord session handling belongs to the onboarding/doctor
//! CLIs, which are explicitly out of scope per spec §1).

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

const DISCORD_CHUNK_CAP: usize = 2000;
const API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordAdapter {
    bot_token: Option<String>,
    client: Client,
}

impl DiscordAdapter {
    pub fn new(bot_token: Option<String>) -> Self {
        Self {
            bot_token,
            client: Client::new(),
        }
    }

    fn auth_header(&self) -> Result<String, ChannelError> {
        self.bot_token
            .as_ref()
            .map(|t| format!("Bot {t}"))
            .ok_or_else(|| ChannelError::NotLinked("discord".to_string()))
    }
}

#[async_trait]
impl ConfigSurface for DiscordAdapter {
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
impl OutboundSurface for DiscordAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, DISCORD_CHUNK_CAP)
    }

    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        // Discord slugs combine guild+channel (spec §4.2 step 5); the
        // channel id alone is the send target.
        Ok(ResolvedTarget { to: envelope.from.clone(), reason: None })
    }

    async fn send_text(&self, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError> {
        let auth = self.auth_header()?;
        let url = format!("{API_BASE}/channels/{}/messages", target.to);
        let resp = self
            .client
            .post(url)
            .header("Authorization", auth)
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| ChannelError::TransientNetwork(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimit("discord 429".to_string()));
        }
        if !resp.status().is_success() {
            return Err(ChannelError::ChatNotFound(target.to.clone()));
        }
        Ok(())
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
impl StatusSurface for DiscordAdapter {
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
        json!({ "channel": "discord" })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, account_id: &str) -> Vec<String> {
        self.audit(account_id)
    }
}

#[async_trait]
impl GatewaySurface for DiscordAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        if self.bot_token.is_none() {
            return Err(ChannelError::NotLinked("discord".to_string()));
        }
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl SecuritySurface for DiscordAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        DmPolicy::Open
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

impl ReloadSurface for DiscordAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.discord"]
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Discord
    }

    fn meta(&self) -> Meta {
        Meta {
            id: "discord",
            label: "Discord",
            order: 2,
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
