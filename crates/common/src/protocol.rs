// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Wire protocol between the daemon and its clients
//
// Newline-delimited JSON over a Unix socket. Inspired by JSON-RPC 2.0
// but not conforming to it: there is no version field and ids are
// client-generated strings. Three message shapes share the stream:
// requests carry an id and a method, responses echo the id, and
// notifications carry a method but no id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TunnelConfig;
use crate::types::{StatusChange, TunnelState};

// Client -> daemon methods
pub const METHOD_TUNNEL_START: &str = "tunnel.start";
pub const METHOD_TUNNEL_STOP: &str = "tunnel.stop";
pub const METHOD_TUNNEL_STATUS: &str = "tunnel.status";
pub const METHOD_TUNNEL_LIST: &str = "tunnel.list";
pub const METHOD_TUNNEL_REGISTER: &str = "tunnel.register";
pub const METHOD_DAEMON_PING: &str = "daemon.ping";
pub const METHOD_DAEMON_SHUTDOWN: &str = "daemon.shutdown";
pub const METHOD_SUBSCRIBE: &str = "subscribe";

// Daemon -> client notification methods
pub const METHOD_STATUS_CHANGED: &str = "tunnel.statusChanged";

// Error codes
pub const ERR_CODE_INTERNAL: i32 = -32603;
pub const ERR_CODE_INVALID_PARAMS: i32 = -32602;
pub const ERR_CODE_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_CODE_TUNNEL_NOT_FOUND: i32 = 1001;
pub const ERR_CODE_TUNNEL_ACTIVE: i32 = 1002;
pub const ERR_CODE_TUNNEL_INACTIVE: i32 = 1003;
pub const ERR_CODE_AUTH_REQUIRED: i32 = 1004;

/// A message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A message from daemon to client answering a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A push message from daemon to client (no id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error payload inside a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl Response {
    /// Build a successful response carrying `result`
    pub fn result<T: Serialize>(id: &str, result: T) -> Response {
        match serde_json::to_value(result) {
            Ok(value) => Response {
                id: id.to_string(),
                result: Some(value),
                error: None,
            },
            Err(e) => Response::error(id, ERR_CODE_INTERNAL, &e.to_string()),
        }
    }

    /// Build an error response
    pub fn error(id: &str, code: i32, message: &str) -> Response {
        Response {
            id: id.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
        }
    }
}

impl Notification {
    pub fn new<T: Serialize>(method: &str, params: T) -> Notification {
        Notification {
            method: method.to_string(),
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }
}

/// Message arriving on a client connection, discriminated by shape
#[derive(Debug)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
    Malformed,
}

/// Classify a raw JSON message read from the daemon.
///
/// A non-empty `id` marks a response; otherwise a non-empty `method`
/// marks a notification; anything else is malformed and dropped by
/// the caller.
pub fn classify_message(raw: &str) -> Incoming {
    if let Ok(resp) = serde_json::from_str::<Response>(raw) {
        if !resp.id.is_empty() {
            return Incoming::Response(resp);
        }
    }

    if let Ok(notif) = serde_json::from_str::<Notification>(raw) {
        if !notif.method.is_empty() {
            return Incoming::Notification(notif);
        }
    }

    Incoming::Malformed
}

// --- Request parameters ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStartParams {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStopParams {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatusParams {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRegisterParams {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub remote: String,
    #[serde(default)]
    pub local: String,
}

// --- Response results ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatusResult {
    pub name: String,
    pub status: TunnelState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One tunnel in the `tunnel.list` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub name: String,
    pub status: TunnelState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub ephemeral: bool,
    pub config: TunnelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelListResult {
    pub tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRegisterResult {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    pub version: String,
}

/// Parameters of the `tunnel.statusChanged` notification
pub type StatusChangedParams = StatusChange;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let req = Request {
            id: "7".to_string(),
            method: METHOD_TUNNEL_START.to_string(),
            params: Some(serde_json::json!({"name": "db"})),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"id":"7","method":"tunnel.start","params":{"name":"db"}}"#
        );
    }

    #[test]
    fn test_response_without_error_omits_error_field() {
        let resp = Response::result("3", PingResult {
            version: "0.1.1".to_string(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"id":"3","result":{"version":"0.1.1"}}"#);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = Response::error("3", ERR_CODE_TUNNEL_NOT_FOUND, "tunnel \"db\" not found");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""code":1001"#));
        assert!(json.contains("not found"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_classify_response() {
        let raw = r#"{"id":"12","result":{"version":"0.1.1"}}"#;
        match classify_message(raw) {
            Incoming::Response(resp) => {
                assert_eq!(resp.id, "12");
                assert!(resp.error.is_none());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let raw = r#"{"method":"tunnel.statusChanged","params":{"name":"db","status":"connecting"}}"#;
        match classify_message(raw) {
            Incoming::Notification(notif) => {
                assert_eq!(notif.method, METHOD_STATUS_CHANGED);
                let params: StatusChangedParams = serde_json::from_value(notif.params).unwrap();
                assert_eq!(params.name, "db");
                assert_eq!(params.status, TunnelState::Connecting);
                assert!(params.error.is_empty());
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_malformed() {
        assert!(matches!(classify_message("{}"), Incoming::Malformed));
        assert!(matches!(classify_message(r#"{"id":""}"#), Incoming::Malformed));
        assert!(matches!(
            classify_message(r#"{"id":"","method":""}"#),
            Incoming::Malformed
        ));
        assert!(matches!(classify_message("not json"), Incoming::Malformed));
    }

    #[test]
    fn test_classify_prefers_response_over_notification() {
        // A message with both id and method is a response; the id wins.
        let raw = r#"{"id":"4","method":"tunnel.statusChanged"}"#;
        assert!(matches!(classify_message(raw), Incoming::Response(_)));
    }

    #[test]
    fn test_tunnel_info_carries_config() {
        let info = TunnelInfo {
            name: "db".to_string(),
            status: TunnelState::Disconnected,
            error: String::new(),
            ephemeral: true,
            config: TunnelConfig {
                name: "db".to_string(),
                host: "u@h:22".to_string(),
                remote: "r:5432".to_string(),
                local: "127.0.0.1:15432".to_string(),
            },
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""ephemeral":true"#));
        assert!(json.contains(r#""status":"disconnected""#));
        assert!(json.contains(r#""remote":"r:5432""#));
        assert!(!json.contains(r#""error""#));

        let parsed: TunnelInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.config.local, "127.0.0.1:15432");
    }
}
