//! The `ChannelAdapter` contract (spec §4.1). Every capability group named
//! in the spec is represented here; groups that are genuinely optional per
//! adapter are queried through `Option<&dyn ...>` accessors rather than
//! being present as no-op methods on every adapter.

use async_trait::async_trait;
use envelope::{ChatType, Envelope};
use serde_json::Value;

use crate::ChannelError;

/// Closed set of adapter variants (spec §9 redesign: no dynamic plugin
/// loading). Adding a surface means adding a variant here and a module
/// under `adapters/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    WhatsApp,
    Telegram,
    Discord,
    Signal,
    IMessage,
    Slack,
    WebChat,
}

impl AdapterKind {
    pub fn id(self) -> &'static str {
        match self {
            AdapterKind::WhatsApp => "whatsapp",
            AdapterKind::Telegram => "telegram",
            AdapterKind::Discord => "discord",
            AdapterKind::Signal => "signal",
            AdapterKind::IMessage => "imessage",
            AdapterKind::Slack => "slack",
            AdapterKind::WebChat => "webchat",
        }
    }
}

/// Stable identity and ordering/option flags (spec §4.1 "meta").
#[derive(Clone, Debug)]
pub struct Meta {
    pub id: &'static str,
    pub label: &'static str,
    pub order: u8,
    pub force_account_binding: bool,
    pub prefer_session_lookup_for_announce_target: bool,
    pub quickstart_allow_from: bool,
    pub show_configured: bool,
}

/// Supported chat types and feature flags (spec §4.1 "capabilities").
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub chat_types: &'static [ChatType],
    pub media: bool,
    pub polls: bool,
    pub native_commands: bool,
    pub block_streaming_default: bool,
}

/// `deliveryMode` from spec §4.1 "outbound".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    TextOnly,
    MediaCapable,
}

pub type ChunkerFn = fn(&str) -> Vec<String>;

/// `DM policy` values for `resolveDmPolicy` (spec §4.1 "security").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmPolicy {
    Open,
    Pairing,
    Allowlist,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupPolicy {
    Open,
    Disabled,
    Allowlist,
}

/// A resolved send target, honoring allowlists (spec §4.1 "outbound").
#[derive(Clone, Debug)]
pub struct ResolvedTarget {
    pub to: String,
    pub reason: Option<&'static str>,
}

/// Runtime context handed to `startAccount`/`stopAccount` (spec §4.1 "gateway").
#[derive(Clone, Debug)]
pub struct AccountContext {
    pub account_id: String,
    pub status: AccountStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStatus {
    Stopped,
    Starting,
    Running,
    NotLinked,
    Error,
}

#[async_trait]
pub trait ConfigSurface: Send + Sync {
    fn is_configured(&self, account_id: &str) -> bool;
    fn is_enabled(&self, account_id: &str) -> bool;
    fn resolve_allow_from(&self, account_id: &str) -> Vec<String>;
    fn format_allow_from(&self, entries: &[String]) -> String {
        entries.join(", ")
    }
}

#[async_trait]
pub trait OutboundSurface: Send + Sync {
    fn delivery_mode(&self) -> DeliveryMode;
    fn chunk(&self, text: &str) -> Vec<String>;
    fn resolve_target(&self, envelope: &Envelope, mode: DeliveryMode) -> Result<ResolvedTarget, ChannelError>;
    async fn send_text(&self, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError>;
    async fn send_media(&self, target: &ResolvedTarget, url_or_path: &str, caption: Option<&str>) -> Result<(), ChannelError>;
    async fn send_poll(&self, target: &ResolvedTarget, question: &str, options: &[String]) -> Result<(), ChannelError> {
        let _ = (target, question, options);
        Err(ChannelError::Unsupported("send_poll"))
    }
    fn poll_max_options(&self) -> usize {
        10
    }
}

#[async_trait]
pub trait StatusSurface: Send + Sync {
    fn default_state(&self) -> AccountStatus;
    async fn probe(&self, account_id: &str) -> AccountStatus;
    fn audit(&self, account_id: &str) -> Vec<String>;
    fn build_account_snapshot(&self, account_id: &str) -> Value;
    fn build_channel_summary(&self) -> Value;
    fn log_self_id(&self, account_id: &str);
    fn collect_status_issues(&self, account_id: &str) -> Vec<String>;
}

#[async_trait]
pub trait GatewaySurface: Send + Sync {
    async fn start_account(&self, ctx: &AccountContext) -> Result<(), ChannelError>;
    async fn stop_account(&self, ctx: &AccountContext) -> Result<(), ChannelError>;
    async fn login_with_qr_start(&self, account_id: &str) -> Result<String, ChannelError> {
        let _ = account_id;
        Err(ChannelError::Unsupported("login_with_qr_start"))
    }
    async fn login_with_qr_wait(&self, account_id: &str) -> Result<(), ChannelError> {
        let _ = account_id;
        Err(ChannelError::Unsupported("login_with_qr_wait"))
    }
    async fn logout_account(&self, account_id: &str) -> Result<(), ChannelError> {
        let _ = account_id;
        Err(ChannelError::Unsupported("logout_account"))
    }
}

pub trait SecuritySurface: Send + Sync {
    fn resolve_dm_policy(&self, account_id: &str) -> DmPolicy;
    fn resolve_group_policy(&self, account_id: &str) -> GroupPolicy {
        let _ = account_id;
        GroupPolicy::Open
    }
    fn collect_warnings(&self, account_id: &str) -> Vec<String>;
}

/// Optional surface: readiness checks + target resolution when the channel
/// owns heartbeat targeting (spec §4.1 "heartbeat", §4.5).
#[async_trait]
pub trait HeartbeatSurface: Send + Sync {
    async fn is_ready(&self, account_id: &str) -> Result<(), &'static str>;
    fn resolve_heartbeat_target(&self, account_id: &str, configured_to: Option<&str>) -> Option<ResolvedTarget>;
}

/// Optional surface: interactive `channels login` hook.
#[async_trait]
pub trait AuthSurface: Send + Sync {
    async fn login(&self, account_id: &str) -> Result<(), ChannelError>;
}

/// `configPrefixes` — config paths whose mutation hot-restarts this
/// adapter only (spec §4.1 "reload").
pub trait ReloadSurface: Send + Sync {
    fn config_prefixes(&self) -> &'static [&'static str];
}

#[async_trait]
pub trait PairingSurface: Send + Sync {
    fn normalize_peer(&self, raw: &str) -> String;
    async fn approve(&self, code: &str, peer: &str) -> Result<(), ChannelError>;
}

pub trait ThreadingSurface: Send + Sync {
    fn resolve_thread_mode(&self, envelope: &Envelope) -> Option<String>;
}

pub trait MessagingSurface: Send + Sync {
    fn dedupe_targets(&self, targets: Vec<String>) -> Vec<String>;
}

#[async_trait]
pub trait ActionsSurface: Send + Sync {
    async fn dispatch_action(&self, name: &str, params: Value) -> Result<Value, ChannelError>;
}

pub trait OnboardingSurface: Send + Sync {
    fn quickstart_steps(&self) -> Vec<&'static str>;
}

pub trait AgentToolsSurface: Send + Sync {
    fn tool_specs(&self) -> Vec<Value>;
}

/// The full per-surface plugin contract (spec §4.1). Required capability
/// groups are supertraits; optional groups are reachable only through the
/// `Option<&dyn ...>` accessor methods, which default to `None`.
#[async_trait]
pub trait ChannelAdapter:
    ConfigSurface + OutboundSurface + StatusSurface + GatewaySurface + SecuritySurface + ReloadSurface
{
    fn kind(&self) -> AdapterKind;
    fn meta(&self) -> Meta;
    fn capabilities(&self) -> Capabilities;

    fn heartbeat(&self) -> Option<&dyn HeartbeatSurface> {
        None
    }
    fn auth(&self) -> Option<&dyn AuthSurface> {
        None
    }
    fn pairing(&self) -> Option<&dyn PairingSurface> {
        None
    }
    fn threading(&self) -> Option<&dyn ThreadingSurface> {
        None
    }
    fn messaging(&self) -> Option<&dyn MessagingSurface> {
        None
    }
    fn actions(&self) -> Option<&dyn ActionsSurface> {
        None
    }
    fn onboarding(&self) -> Option<&dyn OnboardingSurface> {
        None
    }
    fn agent_tools(&self) -> Option<&dyn AgentToolsSurface> {
        None
    }
}

/// Default chunker: splits on a character cap without breaking fenced-code
/// spans (spec §4.1 "outbound" chunker, §4.6 step 1).
pub fn default_chunk(text: &str, cap: usize) -> Vec<String> {
    if text.chars().count() <= cap {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut fence_open = false;
    for line in text.split_inclusive('\n') {
        let would_overflow = current.chars().count() + line.chars().count() > cap;
        if would_overflow && !current.is_empty() && !fence_open {
            chunks.push(std::mem::take(&mut current));
        }
        if line.trim_start().starts_with("```") {
            fence_open = !fence_open;
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(default_chunk("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn never_splits_inside_a_fence() {
        let text = "intro\n```\nline1\nline2\n```\noutro";
        let chunks = default_chunk(text, 10);
        for chunk in &chunks {
            let fences = chunk.matches("```").count();
            assert_eq!(fences % 2, 0, "chunk split inside a fence: {chunk:?}");
        }
        assert_eq!(chunks.concat(), text);
    }
}
