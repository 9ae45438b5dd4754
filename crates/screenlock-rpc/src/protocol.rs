//! Wire protocol types.
//!
//! Requests carry an `id` and get exactly one [`Response`]. Everything the
//! daemon pushes, and every control event a client emits, travels as a
//! [`Notification`] whose `method` is the event name (see [`events`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use screenlock_types::{ConnectionId, Session, SessionId};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_REGISTERED: i32 = -32000;
pub const ALREADY_REGISTERED: i32 = -32001;
pub const NAMESPACE_NOT_FOUND: i32 = -32002;

/// Event names exchanged as notifications.
pub mod events {
    /// client -> daemon: ask for control of a source
    pub const TAKE_CONTROL: &str = "TakeControl";
    /// daemon -> client: answer to `TakeControl`
    pub const CONTROL_SESSION: &str = "ControlSession";
    /// daemon -> client and source: a session became active
    pub const LOCKED_CONTROL: &str = "LockedControl";
    /// daemon -> client and source: a session stopped being active
    pub const UNLOCKED_CONTROL: &str = "UnlockedControl";
    /// daemon -> source: an event forwarded from the controlling client
    pub const CONTROL_EVENT: &str = "ControlEvent";
    /// daemon -> everyone: broadcast from another component
    pub const EXTERNAL_MESSAGE: &str = "ExternalMessage";
}

/// Request methods answered by the daemon.
pub mod methods {
    pub const REGISTER: &str = "register";
    pub const STATUS: &str = "status";
    pub const BROADCAST: &str = "broadcast";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    #[must_use]
    pub fn not_registered() -> Self {
        Self::new(NOT_REGISTERED, "Not registered")
    }

    #[must_use]
    pub fn already_registered() -> Self {
        Self::new(ALREADY_REGISTERED, "Already registered")
    }

    #[must_use]
    pub fn namespace_not_found(namespace: &str) -> Self {
        Self::new(
            NAMESPACE_NOT_FOUND,
            format!("Namespace not found: {namespace}"),
        )
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Any frame on the wire.
///
/// Untagged decoding tries `Request` first, so an id-less notification
/// decodes as a `Request` with `id: None`; [`Message::normalize`] folds that
/// case back into `Notification`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    #[must_use]
    pub fn normalize(self) -> Self {
        match self {
            Message::Request(Request {
                method,
                params,
                id: None,
                ..
            }) => Message::Notification(Notification::new(method, params)),
            other => other,
        }
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Message::Notification(n) => Some(&n.method),
            Message::Request(r) if r.id.is_none() => Some(&r.method),
            _ => None,
        }
    }
}

/// What a connection becomes once registered in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Owns a shared resource and arbitrates control over it
    Source,
    /// Requests control of a source
    Client,
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceKind::Source => f.write_str("source"),
            NamespaceKind::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterParams {
    pub namespace: String,
    /// Source parameters such as `TimeoutDuration`; ignored for clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResult {
    pub connection_id: ConnectionId,
    pub kind: NamespaceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeControlParams {
    #[serde(rename = "targetConnectionId", alias = "callSocketId")]
    pub target_connection_id: ConnectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEventParams {
    pub session_id: SessionId,
    pub event: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMessageParams {
    pub from: String,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub connection_id: ConnectionId,
    pub namespace: String,
    pub active: Option<Session>,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub uptime_secs: u64,
    pub connections: usize,
    pub sources: Vec<SourceStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("status", None, 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"status\""));
        assert!(json.contains("\"id\":1"));
        assert!(
            !json.contains("\"params\""),
            "params should be omitted when None"
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = Notification::new(events::TAKE_CONTROL, Some(json!({"targetConnectionId": "a"})));
        let json = serde_json::to_string(&notif).unwrap();
        assert!(json.contains("\"method\":\"TakeControl\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_error_omits_result() {
        let resp = Response::error(1.into(), RpcError::method_not_found("nope"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32601"));
        assert!(json.contains("nope"));
    }

    #[test]
    fn test_request_id_forms() {
        let id: RequestId = serde_json::from_str("456").unwrap();
        assert_eq!(id, RequestId::Number(456));

        let id: RequestId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(id, RequestId::String("xyz".to_string()));
        assert_eq!(id.to_string(), "xyz");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::not_registered().code, NOT_REGISTERED);
        assert_eq!(RpcError::already_registered().code, ALREADY_REGISTERED);
        assert_eq!(RpcError::parse_error().code, PARSE_ERROR);
        assert_eq!(RpcError::internal_error("x").code, INTERNAL_ERROR);

        let err = RpcError::namespace_not_found("lobby");
        assert_eq!(err.code, NAMESPACE_NOT_FOUND);
        assert!(err.message.contains("lobby"));
        assert!(err.to_string().contains("-32002"));
    }

    #[test]
    fn test_idless_request_normalizes_to_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"TakeControl","params":{"targetConnectionId":"s1"}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.event_name(), Some("TakeControl"));

        match msg.normalize() {
            Message::Notification(n) => assert_eq!(n.method, "TakeControl"),
            other => panic!("Expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn test_request_with_id_is_not_an_event() {
        let raw = r#"{"jsonrpc":"2.0","method":"status","id":7}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.event_name(), None);
        assert!(matches!(msg.normalize(), Message::Request(_)));
    }

    #[test]
    fn test_parse_error_response() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32002,"message":"Namespace not found: x"},"id":1}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        let Message::Response(resp) = msg else {
            panic!("Expected Response");
        };
        assert_eq!(resp.error.unwrap().code, NAMESPACE_NOT_FOUND);
    }

    #[test]
    fn test_namespace_kind_wire_names() {
        assert_eq!(serde_json::to_value(NamespaceKind::Source).unwrap(), "source");
        let kind: NamespaceKind = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(kind, NamespaceKind::Client);
    }

    #[test]
    fn test_register_params_without_source_params() {
        let params: RegisterParams = serde_json::from_value(json!({"namespace": "remote"})).unwrap();
        assert_eq!(params.namespace, "remote");
        assert!(params.params.is_none());
    }

    #[test]
    fn test_take_control_accepts_legacy_key() {
        let params: TakeControlParams =
            serde_json::from_value(json!({"callSocketId": "abc"})).unwrap();
        assert_eq!(params.target_connection_id.as_str(), "abc");

        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value, json!({"targetConnectionId": "abc"}));
    }

    #[test]
    fn test_control_event_params_camel_case() {
        let params = ControlEventParams {
            session_id: "s-1".into(),
            event: "next".to_string(),
            content: json!({"slide": 3}),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["content"]["slide"], 3);
    }
}
