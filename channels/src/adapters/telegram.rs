//! Telegram adapter. Fleshed out on `teloxide`/`teloxide-core` — the
//! transport the teacher workspace already depended on (previously an
//! unfulfilled dependency of a standalone `telegram-bot` binary, now
//! exercised in-process here per spec §1 "one owner, one gateway").

use std::sync::Arc;

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use serde_json::{json, Value};
use teloxide::prelude::*;
use teloxide_core::types::ChatId;

use crate::traits::{
    AccountContext, AccountStatus, Capabilities, DeliveryMode, DmPolicy, Meta, ResolvedTarget,
};
use crate::{
    traits::{default_chunk, AdapterKind},
    ChannelAdapter, ChannelError, ConfigSurface, GatewaySurface, HeartbeatSurface, OutboundSurface,
    ReloadSurface, SecuritySurface, StatusSurface, ThreadingSurface,
};

/// Telegram's own hard cap on a single message's text length.
const TELEGRAM_CHUNK_CAP: usize = 4096;

pub struct TelegramAdapter {
    bot: Option<Arc<Bot>>,
    allow_from: Vec<i64>,
}

impl TelegramAdapter {
    /// `token = None` models a configured-but-disabled adapter (no bot
    /// token set); `is_configured` reports false and sends fail as
    /// `not-linked`.
    pub fn new(token: Option<String>, allow_from: Vec<i64>) -> Self {
        Self {
            bot: token.map(|t| Arc::new(Bot::new(t))),
            allow_from,
        }
    }

    fn parse_chat_id(raw: &str) -> Result<ChatId, ChannelError> {
        raw.parse::<i64>()
            .map(ChatId)
            .map_err(|_| ChannelError::InvalidInput(format!("not a telegram chat id: {raw}")))
    }
}

#[async_trait]
impl ConfigSurface for TelegramAdapter {
    fn is_configured(&self, _account_id: &str) -> bool {
        self.bot.is_some()
    }
    fn is_enabled(&self, account_id: &str) -> bool {
        self.is_configured(account_id)
    }
    fn resolve_allow_from(&self, _account_id: &str) -> Vec<String> {
        self.allow_from.iter().map(|id| id.to_string()).collect()
    }
}

#[async_trait]
impl OutboundSurface for TelegramAdapter {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::MediaCapable
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        default_chunk(text, TELEGRAM_CHUNK_CAP)
    }

    fn resolve_target(&self, envelope: &Envelope, _mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError> {
        let id: i64 = envelope
            .from
            .parse()
            .map_err(|_| ChannelError::InvalidInput(format!("not a telegram chat id: {}", envelope.from)))?;
        if self.allow_from.is_empty() || self.allow_from.contains(&id) {
            Ok(ResolvedTarget { to: id.to_string(), reason: None })
        } else {
            Err(ChannelError::ChatNotFound(envelope.from.clone()))
        }
    }

    async fn send_text(&self, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError> {
        let bot = self.bot.as_ref().ok_or_else(|| ChannelError::NotLinked(target.to.clone()))?;
        let chat_id = Self::parse_chat_id(&target.to)?;
        // Markdown parse errors (spec §4.6 step 4) fall back to plain text.
        match bot.send_message(chat_id, text).parse_mode(teloxide::types::ParseMode::MarkdownV2).await {
            Ok(_) => Ok(()),
            Err(_) => bot
                .send_message(chat_id, text)
                .await
                .map(|_| ())
                .map_err(|e| ChannelError::TransientNetwork(e.to_string())),
        }
    }

    async fn send_media(&self, target: &ResolvedTarget, url_or_path: &str, caption: Option<&str>) -> Result<(), ChannelError> {
        let bot = self.bot.as_ref().ok_or_else(|| ChannelError::NotLinked(target.to.clone()))?;
        let chat_id = Self::parse_chat_id(&target.to)?;
        let url = url_or_path
            .parse::<teloxide::types::Url>()
            .map_err(|_| ChannelError::InvalidInput(format!("not a url: {url_or_path}")))?;
        let mut req = bot.send_photo(chat_id, teloxide::types::InputFile::url(url));
        if let Some(cap) = caption {
            req = req.caption(cap.to_string());
        }
        req.await.map(|_| ()).map_err(|e| ChannelError::TransientNetwork(e.to_string()))
    }
}

#[async_trait]
impl StatusSurface for TelegramAdapter {
    fn default_state(&self) -> AccountStatus {
        if self.bot.is_some() {
            AccountStatus::Stopped
        } else {
            AccountStatus::NotLinked
        }
    }
    async fn probe(&self, _account_id: &str) -> AccountStatus {
        match &self.bot {
            Some(bot) => match bot.get_me().await {
                Ok(_) => AccountStatus::Running,
                Err(_) => AccountStatus::Error,
            },
            None => AccountStatus::NotLinked,
        }
    }
    fn audit(&self, _account_id: &str) -> Vec<String> {
        if self.bot.is_none() {
            vec!["no bot token configured".to_string()]
        } else {
            vec![]
        }
    }
    fn build_account_snapshot(&self, account_id: &str) -> Value {
        json!({ "id": account_id, "configured": self.bot.is_some() })
    }
    fn build_channel_summary(&self) -> Value {
        json!({ "channel": "telegram" })
    }
    fn log_self_id(&self, _account_id: &str) {}
    fn collect_status_issues(&self, account_id: &str) -> Vec<String> {
        self.audit(account_id)
    }
}

#[async_trait]
impl GatewaySurface for TelegramAdapter {
    async fn start_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        if self.bot.is_none() {
            return Err(ChannelError::NotLinked("telegram".to_string()));
        }
        Ok(())
    }
    async fn stop_account(&self, _ctx: &AccountContext) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl SecuritySurface for TelegramAdapter {
    fn resolve_dm_policy(&self, _account_id: &str) -> DmPolicy {
        if self.allow_from.is_empty() {
            DmPolicy::Open
        } else {
            DmPolicy::Allowlist
        }
    }
    fn collect_warnings(&self, _account_id: &str) -> Vec<String> {
        vec![]
    }
}

impl ReloadSurface for TelegramAdapter {
    fn config_prefixes(&self) -> &'static [&'static str] {
        &["channels.telegram"]
    }
}

#[async_trait]
impl HeartbeatSurface for TelegramAdapter {
    async fn is_ready(&self, _account_id: &str) -> Result<(), &'static str> {
        if self.bot.is_none() {
            return Err("telegram-not-linked");
        }
        Ok(())
    }
    fn resolve_heartbeat_target(&self, _account_id: &str, configured_to: Option<&str>) -> Option<ResolvedTarget> {
        configured_to.map(|to| ResolvedTarget { to: to.to_string(), reason: None })
    }
}

impl ThreadingSurface for TelegramAdapter {
    /// Telegram forum topics thread as `message_thread_id`; the session key
    /// resolver already folds this into the key (`:topic:<threadId>`), so
    /// this surface only needs to surface the raw thread id for delivery.
    fn resolve_thread_mode(&self, envelope: &Envelope) -> Option<String> {
        envelope.thread_id.clone()
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Telegram
    }

    fn meta(&self) -> Meta {
        Meta {
            id: "telegram",
            label: "Telegram",
            order: 1,
            force_account_binding: false,
            prefer_session_lookup_for_announce_target: false,
            quickstart_allow_from: true,
            show_configured: true,
        }
    }

    fn capabilities(&self) -> Capabilities {
        const CHAT_TYPES: &[ChatType] = &[ChatType::Direct, ChatType::Group, ChatType::Channel];
        Capabilities {
            chat_types: CHAT_TYPES,
            media: true,
            polls: true,
            native_commands: true,
            block_streaming_default: false,
        }
    }

    fn heartbeat(&self) -> Option<&dyn HeartbeatSurface> {
        Some(self)
    }

    fn threading(&self) -> Option<&dyn ThreadingSurface> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_target_rejects_non_numeric_chat_id() {
        let adapter = TelegramAdapter::new(None, vec![]);
        let env = Envelope {
            raw_body: "hi".into(),
            command_body: "hi".into(),
            reply_to: None,
            surface: "telegram".into(),
            from: "not-a-number".into(),
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
        assert!(matches!(
            adapter.resolve_target(&env, DeliveryMode::MediaCapable),
            Err(ChannelError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_not_ready_without_token() {
        let adapter = TelegramAdapter::new(None, vec![]);
        assert_eq!(adapter.is_ready("default").await, Err("telegram-not-linked"));
    }
}
