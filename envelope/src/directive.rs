//! User-authored `/...` directives parsed from `command_body` (spec §3
//! "Lifecycle", §9 "exceptions for control flow" redesigned as tagged
//! result variants — here, a closed enum rather than a string switch).
//!
//! Directive grammar grounded on the `/approve <id> allow|always|deny`
//! parser shape seen in channel-gateway reference code.

/// `/thinking` and `/verbose` both take the same three-level vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThinkingOrVerboseLevel {
    Off,
    Low,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Allow,
    Always,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupActivationDirective {
    Enable,
    Disable,
}

/// A parsed directive. `Unknown` carries the raw command word so callers can
/// decide whether to surface a help message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    New,
    Reset,
    Thinking(ThinkingOrVerboseLevel),
    Verbose(ThinkingOrVerboseLevel),
    Activation(GroupActivationDirective),
    Approve {
        code: String,
        decision: ApprovalDecision,
    },
    Unknown(String),
}

fn parse_level(word: &str) -> Option<ThinkingOrVerboseLevel> {
    match word {
        "off" => Some(ThinkingOrVerboseLevel::Off),
        "low" => Some(ThinkingOrVerboseLevel::Low),
        "high" => Some(ThinkingOrVerboseLevel::High),
        _ => None,
    }
}

fn parse_decision(word: &str) -> Option<ApprovalDecision> {
    match word {
        "allow" => Some(ApprovalDecision::Allow),
        "always" => Some(ApprovalDecision::Always),
        "deny" => Some(ApprovalDecision::Deny),
        _ => None,
    }
}

impl Directive {
    /// Parses a leading `/command arg...` out of a command body. Returns
    /// `None` when the body carries no directive (the common case — a plain
    /// chat message).
    pub fn parse(command_body: &str) -> Option<Directive> {
        let body = command_body.trim();
        let rest = body.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?.to_ascii_lowercase();
        match head.as_str() {
            "new" => Some(Directive::New),
            "reset" => Some(Directive::Reset),
            "thinking" => parts
                .next()
                .and_then(|w| parse_level(&w.to_ascii_lowercase()))
                .map(Directive::Thinking),
            "verbose" => parts
                .next()
                .and_then(|w| parse_level(&w.to_ascii_lowercase()))
                .map(Directive::Verbose),
            "activation" => match parts.next().map(str::to_ascii_lowercase).as_deref() {
                Some("on") | Some("enable") => {
                    Some(Directive::Activation(GroupActivationDirective::Enable))
                }
                Some("off") | Some("disable") => {
                    Some(Directive::Activation(GroupActivationDirective::Disable))
                }
                _ => None,
            },
            "approve" => {
                let code = parts.next()?.to_string();
                let decision = parts
                    .next()
                    .and_then(|w| parse_decision(&w.to_ascii_lowercase()))?;
                Some(Directive::Approve { code, decision })
            }
            other => Some(Directive::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_has_no_directive() {
        assert_eq!(Directive::parse("hello there"), None);
    }

    #[test]
    fn parses_new_and_reset() {
        assert_eq!(Directive::parse("/new"), Some(Directive::New));
        assert_eq!(Directive::parse("/reset"), Some(Directive::Reset));
    }

    #[test]
    fn parses_thinking_level() {
        assert_eq!(
            Directive::parse("/thinking high"),
            Some(Directive::Thinking(ThinkingOrVerboseLevel::High))
        );
        assert_eq!(Directive::parse("/thinking sideways"), None);
    }

    #[test]
    fn parses_approve_directive() {
        assert_eq!(
            Directive::parse("/approve AB12CD34 allow"),
            Some(Directive::Approve {
                code: "AB12CD34".into(),
                decision: ApprovalDecision::Allow
            })
        );
    }

    #[test]
    fn unknown_command_is_preserved() {
        assert_eq!(
            Directive::parse("/frobnicate"),
            Some(Directive::Unknown("frobnicate".into()))
        );
    }
}
