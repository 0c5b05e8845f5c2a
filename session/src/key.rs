//! Session key resolver (spec §4.2). Deterministic, pure function: given an
//! envelope and the configured scope, returns the SessionKey that the
//! scheduler serializes on.

use envelope::{ChatType, Envelope};

use crate::GLOBAL_SESSION_KEY;

/// `messages.session.scope` config value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionScope {
    PerSender,
    Global,
}

/// Slug normalization: lowercase, spaces→`-`, keep `#@+._-` (spec §4.2 step 5).
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_whitespace() {
                '-'
            } else if c.is_alphanumeric() || "#@+._-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn strip_known_prefixes<'a>(id: &'a str, surface: &str) -> &'a str {
    let id = id.strip_prefix("group:").unwrap_or(id);
    let prefix = format!("{surface}:");
    id.strip_prefix(prefix.as_str()).unwrap_or(id)
}

fn looks_like_group(envelope: &Envelope) -> bool {
    envelope.chat_type == ChatType::Group || envelope.from.starts_with("group:")
}

/// Resolves a SessionKey from an envelope per the algorithm in spec §4.2.
///
/// `main_key` is `messages.session.mainKey` (default `"main"`); used when
/// the envelope resolves to a direct chat.
pub fn resolve_session_key(envelope: &Envelope, scope: SessionScope, main_key: &str) -> String {
    if scope == SessionScope::Global {
        return GLOBAL_SESSION_KEY.to_string();
    }

    if looks_like_group(envelope) {
        let id = strip_known_prefixes(&envelope.from, &envelope.surface);
        let mut key = format!("{}:group:{}", envelope.surface, id);
        if let Some(thread_id) = &envelope.thread_id {
            key.push_str(&format!(":topic:{thread_id}"));
        }
        return key;
    }

    if envelope.chat_type == ChatType::Channel {
        let id = strip_known_prefixes(&envelope.from, &envelope.surface);
        return format!("{}:channel:{}", envelope.surface, id);
    }

    main_key.to_string()
}

/// Display name for a session, used in UI surfaces: `displayName` if the
/// envelope carries one, else a surface-prefixed slug (spec §4.2 step 5).
pub fn display_name(envelope: &Envelope) -> String {
    if let Some(subject) = &envelope.group_subject {
        return subject.clone();
    }
    match envelope.chat_type {
        ChatType::Group => {
            let token = strip_known_prefixes(&envelope.from, &envelope.surface);
            format!("{}:g-{}", envelope.surface, slugify(token))
        }
        ChatType::Channel => {
            let room = envelope.room.as_deref().unwrap_or(&envelope.from);
            format!("{}:#{}", envelope.surface, slugify(room))
        }
        ChatType::Direct => envelope.sender_name.clone().unwrap_or_else(|| envelope.from.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(surface: &str, from: &str, chat_type: ChatType) -> Envelope {
        Envelope {
            raw_body: "hi".into(),
            command_body: "hi".into(),
            reply_to: None,
            surface: surface.into(),
            from: from.into(),
            to: "main".into(),
            chat_type,
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
        }
    }

    #[test]
    fn global_scope_always_wins() {
        let env = envelope("whatsapp", "+1555", ChatType::Direct);
        assert_eq!(
            resolve_session_key(&env, SessionScope::Global, "main"),
            "global"
        );
    }

    #[test]
    fn direct_chats_collapse_to_main_key() {
        let env = envelope("whatsapp", "+15555550123", ChatType::Direct);
        assert_eq!(
            resolve_session_key(&env, SessionScope::PerSender, "main"),
            "main"
        );
    }

    #[test]
    fn group_chats_use_group_key() {
        let env = envelope("whatsapp", "123@g.us", ChatType::Group);
        assert_eq!(
            resolve_session_key(&env, SessionScope::PerSender, "main"),
            "whatsapp:group:123@g.us"
        );
    }

    #[test]
    fn group_key_strips_existing_prefixes() {
        let env = envelope("telegram", "group:telegram:55", ChatType::Group);
        assert_eq!(
            resolve_session_key(&env, SessionScope::PerSender, "main"),
            "telegram:group:55"
        );
    }

    #[test]
    fn telegram_topic_is_appended() {
        let mut env = envelope("telegram", "55", ChatType::Group);
        env.thread_id = Some("77".into());
        assert_eq!(
            resolve_session_key(&env, SessionScope::PerSender, "main"),
            "telegram:group:55:topic:77"
        );
    }

    #[test]
    fn channel_chats_use_channel_key() {
        let env = envelope("slack", "C0123", ChatType::Channel);
        assert_eq!(
            resolve_session_key(&env, SessionScope::PerSender, "main"),
            "slack:channel:C0123"
        );
    }

    #[test]
    fn slugify_keeps_allowed_punctuation() {
        assert_eq!(slugify("Family Group #1"), "family-group-#1");
    }
}
