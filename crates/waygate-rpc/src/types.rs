//! JSON-RPC 2.0 wire-format types (MCP protocol envelope).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors;

/// Incoming JSON-RPC 2.0 request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name (e.g. `initialize`, `tools/list`, `tools/call`).
    pub method: String,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether the envelope is a valid JSON-RPC 2.0 call.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }

    /// Whether this is a notification (no response expected).
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outgoing JSON-RPC 2.0 response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed request identifier (`null` when it could not be read).
    pub id: Value,
    /// Result payload, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The standard 401 shape for unauthenticated RPC calls.
    pub fn unauthorized(id: Value) -> Self {
        Self::error(id, errors::UNAUTHORIZED, "Authentication required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses() {
        let req: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
        )
        .unwrap();
        assert!(req.is_valid());
        assert!(!req.is_notification());
        assert_eq!(req.method, "tools/list");
    }

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn wrong_version_invalid() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap();
        assert!(!req.is_valid());
    }

    #[test]
    fn success_shape() {
        let resp = JsonRpcResponse::success(serde_json::json!(7), serde_json::json!({"ok":true}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["result"]["ok"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_shape() {
        let resp = JsonRpcResponse::error(
            serde_json::Value::Null,
            crate::errors::METHOD_NOT_FOUND,
            "no such method",
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(json["error"]["message"], "no such method");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn unauthorized_shape() {
        let resp = JsonRpcResponse::unauthorized(serde_json::json!("req-1"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], crate::errors::UNAUTHORIZED);
        assert_eq!(json["id"], "req-1");
    }
}
