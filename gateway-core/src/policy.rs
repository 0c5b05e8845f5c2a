//! Allow/Policy Gate (spec §4 component E): DM allowlist, group policy,
//! mention gating, and pairing admission — the last check before an
//! envelope is allowed to reach the scheduler.

use envelope::{ChatType, Envelope};
use session::PairingStore;

/// `security.resolveDmPolicy` (spec §4.1). `Pairing` carries the peers
/// already approved via `pairing.approve` — anyone else gets a fresh code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DmPolicy {
    Open,
    Pairing(Vec<String>),
    Allowlist(Vec<String>),
}

/// `channels.<id>.groups` policy (spec §4.1, §8 "Group with mention gating").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupPolicy {
    Open,
    Disabled,
    Allowlist(Vec<String>),
}

#[derive(Clone, Debug, Default)]
pub struct MentionConfig {
    pub require_mention: bool,
    pub patterns: Vec<String>,
}

/// Per-channel policy configuration the gate consults (spec §6 `channels.<id>`).
#[derive(Clone, Debug)]
pub struct ChannelPolicy {
    pub dm: DmPolicy,
    pub group: GroupPolicy,
    pub mention: MentionConfig,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            dm: DmPolicy::Open,
            group: GroupPolicy::Open,
            mention: MentionConfig::default(),
        }
    }
}

/// Outcome of a gate check (spec §4.2 "policy gate").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Admitted: dispatch a Run.
    Admit,
    /// Rejected but still worth remembering as conversational context —
    /// no Run is dispatched (spec §8 "Group with mention gating").
    StoreAsContext,
    /// Rejected outright (unknown sender with no pairing channel, etc).
    Reject(&'static str),
}

pub struct PolicyGate {
    pairing: PairingStore,
}

impl PolicyGate {
    pub fn new(pairing: PairingStore) -> Self {
        Self { pairing }
    }

    pub fn pairing(&self) -> &PairingStore {
        &self.pairing
    }

    /// Runs the gate for one inbound envelope against its channel's policy.
    /// `mentioned` is the already-resolved `envelope.was_mentioned` flag;
    /// the adapter is responsible for pattern-matching against
    /// `mention.patterns` on ingress (spec §4.1 contract: adapters own
    /// their own text parsing).
    pub async fn check(&self, envelope: &Envelope, policy: &ChannelPolicy) -> GateDecision {
        match envelope.chat_type {
            ChatType::Direct => self.check_dm(envelope, &policy.dm).await,
            ChatType::Group | ChatType::Channel => self.check_group(envelope, policy),
        }
    }

    async fn check_dm(&self, envelope: &Envelope, dm: &DmPolicy) -> GateDecision {
        match dm {
            DmPolicy::Open => GateDecision::Admit,
            DmPolicy::Allowlist(allowed) => {
                if allowed.iter().any(|a| a == "*") || allowed.iter().any(|a| a == &envelope.from) {
                    GateDecision::Admit
                } else {
                    GateDecision::Reject("sender not in allowlist")
                }
            }
            DmPolicy::Pairing(approved) => {
                if approved.iter().any(|p| p == &envelope.from) {
                    GateDecision::Admit
                } else {
                    self.pairing.create(&envelope.surface, &envelope.from).await.ok();
                    GateDecision::Reject("pairing required; code issued")
                }
            }
        }
    }

    fn check_group(&self, envelope: &Envelope, policy: &ChannelPolicy) -> GateDecision {
        match &policy.group {
            GroupPolicy::Disabled => GateDecision::Reject("group messaging disabled"),
            GroupPolicy::Allowlist(allowed) => {
                let group_id = envelope.room.as_deref().unwrap_or(&envelope.to);
                if !allowed.iter().any(|a| a == "*" || a == group_id) {
                    return GateDecision::Reject("group not in allowlist");
                }
                self.check_mention(envelope, &policy.mention)
            }
            GroupPolicy::Open => self.check_mention(envelope, &policy.mention),
        }
    }

    fn check_mention(&self, envelope: &Envelope, mention: &MentionConfig) -> GateDecision {
        if !mention.require_mention {
            return GateDecision::Admit;
        }
        if envelope.was_mentioned {
            GateDecision::Admit
        } else {
            GateDecision::StoreAsContext
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::PairingStore;

    fn env(chat_type: ChatType, from: &str, body: &str, mentioned: bool) -> Envelope {
        Envelope {
            raw_body: body.to_string(),
            command_body: body.to_string(),
            reply_to: None,
            surface: "whatsapp".into(),
            from: from.to_string(),
            to: "123@g.us".into(),
            chat_type,
            group_subject: None,
            group_members: None,
            room: Some("123@g.us".into()),
            space: None,
            sender_name: None,
            sender_identity: None,
            message_id: "m1".into(),
            timestamp: chrono::Utc::now(),
            media: None,
            was_mentioned: mentioned,
            thread_id: None,
            media_urls: vec![],
            reply_target_id: None,
        }
    }

    #[tokio::test]
    async fn group_with_mention_gating_rejects_unmentioned_as_context_only() {
        let gate = PolicyGate::new(PairingStore::new());
        let policy = ChannelPolicy {
            dm: DmPolicy::Open,
            group: GroupPolicy::Open,
            mention: MentionConfig { require_mention: true, patterns: vec!["@clawd".into()] },
        };

        let mentioned = env(ChatType::Group, "123@g.us", "@clawd status", true);
        assert_eq!(gate.check(&mentioned, &policy).await, GateDecision::Admit);

        let unmentioned = env(ChatType::Group, "123@g.us", "hello", false);
        assert_eq!(gate.check(&unmentioned, &policy).await, GateDecision::StoreAsContext);
    }

    #[tokio::test]
    async fn whatsapp_wildcard_allowlist_admits_any_sender() {
        let gate = PolicyGate::new(PairingStore::new());
        let policy = ChannelPolicy {
            dm: DmPolicy::Allowlist(vec!["*".to_string()]),
            ..ChannelPolicy::default()
        };
        let e = env(ChatType::Direct, "+15555550123", "hi", false);
        assert_eq!(gate.check(&e, &policy).await, GateDecision::Admit);
    }

    #[tokio::test]
    async fn empty_allowlist_with_group_allowlist_policy_admits_none() {
        let gate = PolicyGate::new(PairingStore::new());
        let policy = ChannelPolicy {
            group: GroupPolicy::Allowlist(vec![]),
            ..ChannelPolicy::default()
        };
        let e = env(ChatType::Group, "123@g.us", "hello", false);
        assert_eq!(gate.check(&e, &policy).await, GateDecision::Reject("group not in allowlist"));
    }

    #[tokio::test]
    async fn dm_pairing_policy_rejects_unpaired_sender_and_issues_a_code() {
        let gate = PolicyGate::new(PairingStore::new());
        let policy = ChannelPolicy { dm: DmPolicy::Pairing(vec![]), ..ChannelPolicy::default() };
        let e = env(ChatType::Direct, "+15555550199", "hi", false);
        let decision = gate.check(&e, &policy).await;
        assert!(matches!(decision, GateDecision::Reject(_)));
        assert_eq!(gate.pairing().list().await.len(), 1);
    }

    #[tokio::test]
    async fn dm_pairing_policy_admits_already_approved_peer() {
        let gate = PolicyGate::new(PairingStore::new());
        let policy = ChannelPolicy {
            dm: DmPolicy::Pairing(vec!["+15555550199".to_string()]),
            ..ChannelPolicy::default()
        };
        let e = env(ChatType::Direct, "+15555550199", "hi", false);
        assert_eq!(gate.check(&e, &policy).await, GateDecision::Admit);
    }
}
