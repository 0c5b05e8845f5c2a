//! Closed placeholder vocabulary for `{{...}}` template expansion (spec §9:
//! "dynamic property inspection on envelopes" redesigned as a closed enum).

use crate::Envelope;

/// Recognized template placeholders. Unknown `{{...}}` keys resolve to the
/// empty string — expansion never fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    SenderName,
    ChatType,
    GroupSubject,
    Surface,
    Date,
    Time,
}

impl Placeholder {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "SenderName" => Some(Self::SenderName),
            "ChatType" => Some(Self::ChatType),
            "GroupSubject" => Some(Self::GroupSubject),
            "Surface" => Some(Self::Surface),
            "Date" => Some(Self::Date),
            "Time" => Some(Self::Time),
            _ => None,
        }
    }

    fn resolve(self, env: &Envelope) -> String {
        match self {
            Self::SenderName => env.sender_name.clone().unwrap_or_default(),
            Self::ChatType => match env.chat_type {
                crate::ChatType::Direct => "direct".to_string(),
                crate::ChatType::Group => "group".to_string(),
                crate::ChatType::Channel => "channel".to_string(),
            },
            Self::GroupSubject => env.group_subject.clone().unwrap_or_default(),
            Self::Surface => env.surface.clone(),
            Self::Date => env.timestamp.format("%Y-%m-%d").to_string(),
            Self::Time => env.timestamp.format("%H:%M:%S").to_string(),
        }
    }
}

/// Pure template expansion: `{{Key}}` tokens are replaced with the resolved
/// value, or the empty string if `Key` is not a recognized [`Placeholder`].
pub fn expand_template(tpl: &str, env: &Envelope) -> String {
    let mut out = String::with_capacity(tpl.len());
    let mut rest = tpl;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                let value = Placeholder::from_key(key)
                    .map(|p| p.resolve(env))
                    .unwrap_or_default();
                out.push_str(&value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatType;

    fn env() -> Envelope {
        Envelope {
            raw_body: "hi".into(),
            command_body: "hi".into(),
            reply_to: None,
            surface: "telegram".into(),
            from: "u1".into(),
            to: "main".into(),
            chat_type: ChatType::Group,
            group_subject: Some("Family".into()),
            group_members: None,
            room: None,
            space: None,
            sender_name: Some("Ada".into()),
            sender_identity: None,
            message_id: "m1".into(),
            timestamp: chrono::DateTime::parse_from_rfc3339("2026-07-28T10:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            media: None,
            was_mentioned: false,
            thread_id: None,
            media_urls: vec![],
            reply_target_id: None,
        }
    }

    #[test]
    fn expands_known_placeholders() {
        let out = expand_template("{{SenderName}} in {{GroupSubject}} ({{ChatType}})", &env());
        assert_eq!(out, "Ada in Family (group)");
    }

    #[test]
    fn unknown_keys_resolve_to_empty() {
        assert_eq!(expand_template("x{{Nope}}y", &env()), "xy");
    }

    #[test]
    fn unterminated_braces_pass_through() {
        assert_eq!(expand_template("a{{Surface", &env()), "a{{Surface");
    }
}
