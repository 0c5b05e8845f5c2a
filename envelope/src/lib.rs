//! Envelope & Context: the normalized message record every channel adapter
//! produces on ingress and every outbound send consumes.

mod directive;
mod template;

pub use directive::{ApprovalDecision, Directive, GroupActivationDirective, ThinkingOrVerboseLevel};
pub use template::{expand_template, Placeholder};

use serde::{Deserialize, Serialize};

/// `direct|group|channel` as named in the session key resolver (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

/// Inbound media attachment: at most one of a local path or a remote URL is
/// populated at any given time (never both — see [`Envelope::validate`]).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Reply-to context carried on an inbound envelope when the user replied to
/// a prior message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplyTo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Normalized inbound or outbound message record (spec §3 "Envelope").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub raw_body: String,
    /// Directive-stripped body; equal to `raw_body` when no leading `/command` was found.
    pub command_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    /// Stable adapter id: `whatsapp`, `telegram`, `discord`, `signal`, `imessage`, `slack`, `webchat`.
    pub surface: String,
    pub from: String,
    pub to: String,
    pub chat_type: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_members: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_identity: Option<String>,
    pub message_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub was_mentioned: bool,
    /// Telegram forum topic thread id, if the channel supports sub-threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    // Outbound-only fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_target_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope carries both mediaUrl and mediaUrls")]
    ConflictingMedia,
    #[error("envelope has empty text and no media")]
    EmptyWithoutMedia,
}

impl Envelope {
    /// Invariant: at most one of `media` / `media_urls` populated; empty text
    /// is legal only when media exists (spec §3).
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.media.is_some() && !self.media_urls.is_empty() {
            return Err(EnvelopeError::ConflictingMedia);
        }
        let has_media = self.media.is_some() || !self.media_urls.is_empty();
        if self.command_body.trim().is_empty() && !has_media {
            return Err(EnvelopeError::EmptyWithoutMedia);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Envelope {
        Envelope {
            raw_body: "hi".into(),
            command_body: "hi".into(),
            reply_to: None,
            surface: "whatsapp".into(),
            from: "+15555550123".into(),
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
        }
    }

    #[test]
    fn rejects_conflicting_media() {
        let mut e = base();
        e.media = Some(MediaRef::default());
        e.media_urls = vec!["https://example.com/a.png".into()];
        assert!(matches!(e.validate(), Err(EnvelopeError::ConflictingMedia)));
    }

    #[test]
    fn rejects_empty_body_without_media() {
        let mut e = base();
        e.command_body = "   ".into();
        assert!(matches!(e.validate(), Err(EnvelopeError::EmptyWithoutMedia)));
    }

    #[test]
    fn accepts_empty_body_with_media() {
        let mut e = base();
        e.command_body = "".into();
        e.media = Some(MediaRef {
            local_path: Some("/tmp/a.png".into()),
            ..Default::default()
        });
        assert!(e.validate().is_ok());
    }
}
