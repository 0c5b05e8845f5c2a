//! Smoke test: bootstrap a gateway against a throwaway data dir, connect
//! over WebSocket, complete the handshake, and round-trip a `health` RPC.
//! Full protocol coverage lives in the `serve` crate's own test modules.

use std::time::Duration;

use cli::bootstrap::Layout;
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMode, Hello, HelloOk, RpcRequest, RpcResponse};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[tokio::test]
async fn gateway_e2e_handshake_and_health() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::under(dir.path());
    let (state, _default_addr) = cli::bootstrap(&layout).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");
    let server = tokio::spawn(serve::run_gateway_on_listener(listener, state));

    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    let hello = Hello {
        client_name: "gateway-e2e".to_string(),
        client_version: "0.1.0".to_string(),
        platform: "test".to_string(),
        mode: ClientMode::Cli,
        instance_id: "test-instance".to_string(),
        min_protocol: protocol::MIN_PROTOCOL_VERSION,
        max_protocol: protocol::PROTOCOL_VERSION,
        auth: None,
        last_seq: None,
    };
    write.send(Message::Text(serde_json::to_string(&hello).unwrap())).await.unwrap();

    let hello_ok_msg = timeout(Duration::from_secs(5), read.next()).await.unwrap().unwrap().unwrap();
    let hello_ok: HelloOk = serde_json::from_str(hello_ok_msg.to_text().unwrap()).unwrap();
    assert_eq!(hello_ok.protocol, protocol::PROTOCOL_VERSION);
    assert!(hello_ok.snapshot.healthy);

    let req = RpcRequest { id: "health-1".to_string(), method: "health".to_string(), params: None, expect_final: false };
    write.send(Message::Text(serde_json::to_string(&req).unwrap())).await.unwrap();

    let resp_msg = timeout(Duration::from_secs(5), read.next()).await.unwrap().unwrap().unwrap();
    let resp: RpcResponse = serde_json::from_str(resp_msg.to_text().unwrap()).unwrap();
    match resp {
        RpcResponse::Ok { id, result } => {
            assert_eq!(id, "health-1");
            assert_eq!(result.get("healthy").and_then(|v| v.as_bool()), Some(true));
        }
        RpcResponse::Err { error, .. } => panic!("unexpected error response: {error:?}"),
    }

    drop(write);
    drop(read);
    server.abort();
}
