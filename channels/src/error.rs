//! Channel-surface error type. Mapped into `gateway_core::GatewayError` at
//! the scheduler/delivery boundary (spec §7 error-kind taxonomy).

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("channel not linked: {0}")]
    NotLinked(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported operation for this adapter: {0}")]
    Unsupported(&'static str),
}

impl ChannelError {
    /// Transient-error classification used by the outbound retry loop
    /// (spec §4.6): `429|timeout|connect|reset|closed|unavailable|temporarily`.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::RateLimit(_) | ChannelError::TransientNetwork(_))
    }
}
