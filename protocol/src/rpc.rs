//! RPC request/response envelopes (spec §4.4, §6 "required methods for
//! minimum implementation").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{id, method, params?}`. `method` is namespaced: `chat.*`, `nodes.*`,
/// `sessions.*`, `config.*`, `providers.*`, `cron.*`, `skills.*`,
/// `channels.*`, `web.login.*`, `pairing.*`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Block until the operation's terminal event rather than the
    /// acknowledgement (spec §4.4).
    #[serde(default)]
    pub expect_final: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

/// `{id, result|error}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcResponse {
    Ok { id: String, result: Value },
    Err { id: String, error: RpcError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_without_params() {
        let req = RpcRequest {
            id: "1".into(),
            method: "health".into(),
            params: None,
            expect_final: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "health");
        assert!(parsed.params.is_none());
    }

    #[test]
    fn ok_response_tags_as_ok() {
        let resp = RpcResponse::Ok {
            id: "1".into(),
            result: serde_json::json!({"status": "ready"}),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn error_response_round_trips() {
        let resp = RpcResponse::Err {
            id: "1".into(),
            error: RpcError {
                code: "invalid-input".into(),
                message: "bad method".into(),
                field_path: Some("method".into()),
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            RpcResponse::Err { error, .. } => assert_eq!(error.code, "invalid-input"),
            _ => panic!("expected error response"),
        }
    }
}
