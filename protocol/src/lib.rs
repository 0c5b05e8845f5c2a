//! # Gateway wire protocol
//!
//! JSON frames over a single WebSocket, binary neutral (spec §4.4). This
//! crate is the client↔gateway wire format — distinct from `stream-event`,
//! which is the agent engine's own internal node/step event envelope.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     protocol (this crate)                   │
//! ├────────────────────────────────────────────────────────────┤
//! │  Hello / HelloOk           handshake, version negotiation    │
//! │  RpcRequest / RpcResponse  namespaced methods (chat.*, ...)  │
//! │  EventFrame                seq-ordered server→client push    │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod event;
mod handshake;
mod rpc;

pub use event::{EventFrame, EventKind, GapPayload};
pub use handshake::{AuthConfig, AuthMode, ClientMode, Hello, HelloOk, Snapshot};
pub use rpc::{RpcError, RpcRequest, RpcResponse};

/// Current protocol version; negotiated at handshake time.
pub const PROTOCOL_VERSION: u32 = 1;
pub const MIN_PROTOCOL_VERSION: u32 = 1;
