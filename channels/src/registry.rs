//! Adapter registry: owns at most one active instance per
//! `(adapter.id, accountId)` (spec §5 "Shared resources"). Reload is a
//! stop-then-start under a per-adapter lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::traits::{AccountContext, AccountStatus, AdapterKind};
use crate::{ChannelAdapter, ChannelError};

struct Slot {
    adapter: Arc<dyn ChannelAdapter>,
    lock: Mutex<()>,
}

/// Holds one adapter instance per configured `(kind, accountId)` pair.
/// The gateway scheduler and outbound pipeline look adapters up here;
/// adapters never look each other up.
#[derive(Default)]
pub struct Registry {
    slots: HashMap<(AdapterKind, String), Slot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, account_id: impl Into<String>, adapter: Arc<dyn ChannelAdapter>) {
        let key = (adapter.kind(), account_id.into());
        self.slots.insert(
            key,
            Slot {
                adapter,
                lock: Mutex::new(()),
            },
        );
    }

    pub fn get(&self, kind: AdapterKind, account_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.slots
            .get(&(kind, account_id.to_string()))
            .map(|slot| slot.adapter.clone())
    }

    pub fn get_by_surface(&self, surface: &str, account_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        let kind = match surface {
            "whatsapp" => AdapterKind::WhatsApp,
            "telegram" => AdapterKind::Telegram,
            "discord" => AdapterKind::Discord,
            "signal" => AdapterKind::Signal,
            "imessage" => AdapterKind::IMessage,
            "slack" => AdapterKind::Slack,
            "webchat" => AdapterKind::WebChat,
            _ => return None,
        };
        self.get(kind, account_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(AdapterKind, String), Arc<dyn ChannelAdapter>)> {
        self.slots.iter().map(|(k, slot)| (k, slot.adapter.clone()))
    }

    /// Stop-then-start under the adapter's own lock (spec §5).
    pub async fn reload(&self, kind: AdapterKind, account_id: &str) -> Result<(), ChannelError> {
        let key = (kind, account_id.to_string());
        let slot = self
            .slots
            .get(&key)
            .ok_or_else(|| ChannelError::InvalidInput(format!("no adapter {}:{account_id}", kind.id())))?;
        let _guard = slot.lock.lock().await;
        let ctx = AccountContext {
            account_id: account_id.to_string(),
            status: AccountStatus::Running,
        };
        slot.adapter.stop_account(&ctx).await?;
        slot.adapter.start_account(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WebChatAdapter;

    #[tokio::test]
    async fn register_then_lookup_by_surface() {
        let mut registry = Registry::new();
        registry.register("default", Arc::new(WebChatAdapter::new()));
        let found = registry.get_by_surface("webchat", "default");
        assert!(found.is_some());
        assert!(registry.get_by_surface("webchat", "other").is_none());
    }
}
