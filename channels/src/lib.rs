//! # Channel Adapter Registry
//!
//! The polymorphic unit the gateway consumes: every chat surface
//! (WhatsApp, Telegram, Discord, Signal, iMessage, Slack, plus the
//! in-house WebChat) implements [`ChannelAdapter`]. Adapters are a closed
//! enum of variants rather than dynamically loaded plugins (spec §9
//! "dynamic polymorphism across channels" redesign): each adapter module is
//! `pub(crate)` except its public constructor, so adapters cannot import
//! each other, and the registry never reaches into adapter internals.

mod adapters;
mod error;
mod registry;
mod traits;

pub use adapters::{
    discord::DiscordAdapter, imessage::IMessageAdapter, signal::SignalAdapter,
    slack::SlackAdapter, telegram::TelegramAdapter, webchat::WebChatAdapter,
    whatsapp::WhatsAppAdapter,
};
pub use error::ChannelError;
pub use registry::Registry;
pub use traits::{
    AccountContext, AccountStatus, AdapterKind, AgentToolsSurface, Capabilities, ChannelAdapter,
    ChunkerFn, ConfigSurface, DeliveryMode, DmPolicy, GatewaySurface, GroupPolicy,
    HeartbeatSurface, Meta, MessagingSurface, OnboardingSurface, OutboundSurface, PairingSurface,
    ReloadSurface, ResolvedTarget, SecuritySurface, StatusSurface, ThreadingSurface, ActionsSurface,
};
