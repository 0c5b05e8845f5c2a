//! Gateway Protocol Server (spec §4.4): a versioned WebSocket handshake,
//! namespaced JSON-RPC dispatch, and sequenced event fan-out, sitting in
//! front of the scheduler/policy/channel stack built in `gateway-core`.
//!
//! **Public API**: [`run_gateway`], [`run_gateway_on_listener`].

mod app;
mod connection;
mod events;
mod rpc;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{AuthSettings, GatewayState, RoutingConfig};
pub use events::EventBus;

const DEFAULT_ADDR: &str = "127.0.0.1:8765";

/// Wires the scheduler's stream/terminal `mpsc` channels into the event bus
/// (and, for terminal events, into a `broadcast` channel `chat.send
/// expectFinal` callers subscribe to directly) — spec §2 "F publishes
/// events" / "H delivers".
pub fn spawn_event_bridges(
    stream_rx: tokio::sync::mpsc::UnboundedReceiver<gateway_core::AgentStreamEvent>,
    terminal_rx: tokio::sync::mpsc::UnboundedReceiver<gateway_core::RunTerminalEvent>,
    bus: Arc<EventBus>,
    terminal_tx: tokio::sync::broadcast::Sender<gateway_core::RunTerminalEvent>,
    registry: Arc<channels::Registry>,
) {
    tokio::spawn(events::bridge_stream_events(stream_rx, bus.clone()));
    tokio::spawn(events::bridge_terminal_events(terminal_rx, bus, terminal_tx, registry));
}

/// Drives the heartbeat and cron schedulers on their own timer, re-entering
/// the scheduler at component F exactly like an inbound envelope (spec §2
/// "J and K re-enter at F with synthesized envelopes").
pub fn spawn_background_schedulers(state: Arc<GatewayState>, heartbeats: Vec<gateway_core::HeartbeatConfig>, tick_period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            for cfg in &heartbeats {
                let outcome = state.heartbeat.run_heartbeat_once(cfg).await;
                tracing::debug!(session_key = %cfg.session_key, outcome = ?outcome, "heartbeat tick");
            }
            state.cron.tick(chrono::Utc::now()).await;
        }
    });
}

/// Runs the gateway protocol server, binding a fresh listener at `addr`
/// (default `127.0.0.1:8765`).
pub async fn run_gateway(addr: Option<&str>, state: Arc<GatewayState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = addr.unwrap_or(DEFAULT_ADDR).parse()?;
    let listener = TcpListener::bind(addr).await?;
    run_gateway_on_listener(listener, state).await
}

/// Runs the gateway protocol server on an already-bound listener. Used by
/// tests (bind to `127.0.0.1:0`, then pass the listener in to discover the
/// assigned port).
pub async fn run_gateway_on_listener(listener: TcpListener, state: Arc<GatewayState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "gateway protocol server listening");
    let router = app::router(state);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
