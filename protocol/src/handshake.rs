//! `hello`/`helloOk` handshake (spec §4.4).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    Webchat,
    Tui,
    Cli,
    Node,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    None,
    Token,
    Password,
    Tailscale,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Client→server handshake frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub client_name: String,
    pub client_version: String,
    pub platform: String,
    pub mode: ClientMode,
    pub instance_id: String,
    pub min_protocol: u32,
    pub max_protocol: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Last event `seq` this client already has, for gap-free resume after
    /// a reconnect (spec §4.4 "event fan-out").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u64>,
}

/// Presence + health snapshot returned with `helloOk`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub connected_nodes: u32,
    pub channels_online: Vec<String>,
    pub healthy: bool,
}

/// Server→client handshake reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HelloOk {
    pub protocol: u32,
    pub snapshot: Snapshot,
}
