//! WebSocket connection lifecycle: handshake, resume/gap recovery, RPC
//! dispatch, and event fan-out (spec §4.4).
//!
//! Grounded on the teacher's `serve/src/connection.rs` select-loop shape
//! (recv from the socket, recv from an internal channel, act on whichever
//! is ready first), generalized from a single shutdown signal to the full
//! hello/helloOk handshake plus a live event subscription.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;

use protocol::{EventFrame, Hello, HelloOk, RpcRequest, RpcResponse, Snapshot};

use crate::app::GatewayState;
use crate::rpc;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayState>, peer_is_loopback: bool) {
    let hello = match recv_hello(&mut socket).await {
        Some(h) => h,
        None => {
            let _ = socket.close().await;
            return;
        }
    };

    let protocol_version = match negotiate(&hello) {
        Some(v) => v,
        None => {
            let _ = send_value(&mut socket, &serde_json::json!({"error": "unsupported protocol range"})).await;
            let _ = socket.close().await;
            return;
        }
    };

    if let Err(reason) = state.auth.check(hello.auth.as_ref(), peer_is_loopback) {
        let _ = send_value(&mut socket, &serde_json::json!({"error": reason})).await;
        let _ = socket.close().await;
        return;
    }

    let snapshot = build_snapshot(&state).await;
    let hello_ok = HelloOk { protocol: protocol_version, snapshot };
    if send_value(&mut socket, &hello_ok).await.is_err() {
        return;
    }

    let mut events_rx = state.events.subscribe();

    if let Some(last_seq) = hello.last_seq {
        match state.events.replay_since(last_seq) {
            Ok(frames) => {
                for frame in frames {
                    if send_value(&mut socket, &frame).await.is_err() {
                        return;
                    }
                }
            }
            Err((expected, received)) => {
                let gap = EventFrame::gap(state.events.current_seq(), expected, received);
                if send_value(&mut socket, &gap).await.is_err() {
                    return;
                }
            }
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(frame) = incoming else { break };
                let msg = match frame {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                };
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<RpcRequest>(&text) {
                    Ok(request) => {
                        let response = run_request(&state, request).await;
                        if send_value(&mut socket, &response).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let response = RpcResponse::Err {
                            id: "unknown".to_string(),
                            error: protocol::RpcError { code: "parse-error".into(), message: e.to_string(), field_path: None },
                        };
                        if send_value(&mut socket, &response).await.is_err() {
                            break;
                        }
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(frame) => {
                        if send_value(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let current = state.events.current_seq();
                        let gap = EventFrame::gap(current, current.saturating_sub(skipped) + 1, current);
                        if send_value(&mut socket, &gap).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn run_request(state: &Arc<GatewayState>, request: RpcRequest) -> RpcResponse {
    match rpc::dispatch(state, &request).await {
        Ok(result) => RpcResponse::Ok { id: request.id, result },
        Err(error) => RpcResponse::Err { id: request.id, error },
    }
}

async fn recv_hello(socket: &mut WebSocket) -> Option<Hello> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, socket.recv()).await.ok()??;
    let msg = frame.ok()?;
    let text = match msg {
        Message::Text(t) => t,
        Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
        _ => return None,
    };
    serde_json::from_str(&text).ok()
}

fn negotiate(hello: &Hello) -> Option<u32> {
    let lo = hello.min_protocol.max(protocol::MIN_PROTOCOL_VERSION);
    let hi = hello.max_protocol.min(protocol::PROTOCOL_VERSION);
    (lo <= hi).then_some(hi)
}

async fn build_snapshot(state: &Arc<GatewayState>) -> Snapshot {
    let connected_nodes = state.nodes.list(Some(nodes::NodeStatus::Paired)).await.map(|v| v.len() as u32).unwrap_or(0);
    let mut channels_online = Vec::new();
    for ((kind, account_id), adapter) in state.registry.iter() {
        if matches!(adapter.probe(account_id).await, channels::AccountStatus::Running) {
            channels_online.push(kind.id().to_string());
        }
    }
    Snapshot { connected_nodes, channels_online, healthy: true }
}

async fn send_value<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
