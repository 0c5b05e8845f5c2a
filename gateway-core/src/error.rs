//! Cross-cutting error taxonomy (spec §7). Every boundary-crossing error in
//! the gateway — agent engine, channel adapter, session store, protocol
//! server — is mapped into a `GatewayError` so callers branch on `kind()`
//! rather than matching strings or downstream crate error types.

use channels::ChannelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Auth,
    Protocol,
    RateLimit,
    TransientNetwork,
    NotLinked,
    ContextOverflow,
    InvalidInput,
    ChatNotFound,
    Aborted,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Auth(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("channel not linked: {0}")]
    NotLinked(String),
    #[error("agent reported context overflow")]
    ContextOverflow,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("run aborted")]
    Aborted,
    /// Internal engine failure (loom `RunError::{Execution,Compilation,Checkpoint}`)
    /// that doesn't map onto a more specific kind.
    #[error("agent engine error: {0}")]
    Engine(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Auth(_) => ErrorKind::Auth,
            GatewayError::Protocol(_) => ErrorKind::Protocol,
            GatewayError::RateLimit(_) => ErrorKind::RateLimit,
            GatewayError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            GatewayError::NotLinked(_) => ErrorKind::NotLinked,
            GatewayError::ContextOverflow => ErrorKind::ContextOverflow,
            GatewayError::InvalidInput(_) => ErrorKind::InvalidInput,
            GatewayError::ChatNotFound(_) => ErrorKind::ChatNotFound,
            GatewayError::Aborted => ErrorKind::Aborted,
            // Treated as a generic internal failure; not one of the
            // user-facing §7 kinds, so it's excluded from ErrorKind.
            GatewayError::Engine(_) => ErrorKind::InvalidInput,
        }
    }

    /// Retry policy per §4.6/§7: transient kinds retry locally with
    /// backoff; everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::TransientNetwork)
    }
}

impl From<ChannelError> for GatewayError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::RateLimit(m) => GatewayError::RateLimit(m),
            ChannelError::TransientNetwork(m) => GatewayError::TransientNetwork(m),
            ChannelError::NotLinked(m) => GatewayError::NotLinked(m),
            ChannelError::ChatNotFound(m) => GatewayError::ChatNotFound(m),
            ChannelError::InvalidInput(m) => GatewayError::InvalidInput(m),
            ChannelError::Unsupported(m) => GatewayError::InvalidInput(m.to_string()),
        }
    }
}

impl From<loom::RunError> for GatewayError {
    fn from(e: loom::RunError) -> Self {
        GatewayError::Engine(e.to_string())
    }
}
