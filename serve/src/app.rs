//! Shared gateway state, auth policy, and the axum router (spec §4.4).
//!
//! Grounded on the teacher's `serve/src/app.rs`: one `AppState` built once at
//! startup, an axum `Router` with a single WebSocket route, and
//! `ConnectInfo<SocketAddr>` threaded through so the handler can apply a
//! loopback bypass the way the teacher's local-dev mode does.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;

use channels::Registry;
use config::ConfigDocument;
use gateway_core::{CronScheduler, HeartbeatScheduler, PolicyGate, Scheduler};
use protocol::{AuthConfig, AuthMode};
use session::{SessionStore, TranscriptStore};

use crate::events::EventBus;

/// Resolved `auth.mode` + secret, compared against whatever the client's
/// `hello.auth` carries (spec §4.4 "auth modes").
pub struct AuthSettings {
    pub mode: AuthMode,
    pub token: Option<String>,
    pub password: Option<String>,
}

impl AuthSettings {
    /// `None`: always passes. `Token`/`Password`: constant-time compare,
    /// with a loopback bypass for `Token` when no token is configured (dev
    /// convenience, same as a bare local `clawdis serve`). `Tailscale`:
    /// identity is established upstream by the reverse proxy/tsnet, so
    /// there's nothing left to check here.
    pub fn check(&self, auth: Option<&AuthConfig>, peer_is_loopback: bool) -> Result<(), &'static str> {
        match self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Tailscale => Ok(()),
            AuthMode::Token => {
                let Some(expected) = &self.token else {
                    return if peer_is_loopback { Ok(()) } else { Err("no token configured") };
                };
                let given = auth.and_then(|a| a.token.as_deref()).unwrap_or("");
                if bool::from(expected.as_bytes().ct_eq(given.as_bytes())) {
                    Ok(())
                } else {
                    Err("invalid token")
                }
            }
            AuthMode::Password => {
                let Some(expected) = &self.password else {
                    return Err("no password configured");
                };
                let given = auth.and_then(|a| a.password.as_deref()).unwrap_or("");
                if bool::from(expected.as_bytes().ct_eq(given.as_bytes())) {
                    Ok(())
                } else {
                    Err("invalid password")
                }
            }
        }
    }
}

/// `messages.session` config, resolved once at startup (spec §4.2).
pub struct RoutingConfig {
    pub scope: session::SessionScope,
    pub main_key: String,
}

/// Everything a connection handler or RPC dispatcher needs. One instance,
/// shared via `Arc`, for the life of the process.
pub struct GatewayState {
    pub auth: AuthSettings,
    pub routing: RoutingConfig,
    pub scheduler: Arc<Scheduler>,
    pub policy: Arc<PolicyGate>,
    pub heartbeat: Arc<HeartbeatScheduler>,
    pub cron: Arc<CronScheduler>,
    pub registry: Arc<Registry>,
    pub sessions: Arc<SessionStore>,
    pub transcripts: Arc<TranscriptStore>,
    pub nodes: Arc<nodes::Store>,
    pub config: Arc<ConfigDocument>,
    pub events: Arc<EventBus>,
    pub terminal_events: broadcast::Sender<gateway_core::RunTerminalEvent>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> axum::response::Response {
    let peer_is_loopback = addr.ip().is_loopback();
    ws.on_upgrade(move |socket| crate::connection::handle_socket(socket, state, peer_is_loopback))
}
